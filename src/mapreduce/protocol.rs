//! Wire messages exchanged between workers and the coordinator
//!
//! Every frame carries one [`Envelope`] whose `body` variant is the message
//! type. Field names follow the wire vocabulary (`file_name`, `dict_name`,
//! `dict_list`, `word_list`, `slave_id`); the rest of the crate only deals in
//! [`Request`] and [`Response`].

use crate::mapreduce::error::CodecError;

/// W→C `idle`: poll for work
#[derive(Clone, PartialEq, prost::Message)]
pub struct Poll {
    #[prost(string, tag = "1")]
    pub id: String,
}

/// W→C `map_done`: map finished, `dict_name` references the intermediate result
#[derive(Clone, PartialEq, prost::Message)]
pub struct MapDone {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub file_name: String,
    #[prost(string, tag = "3")]
    pub dict_name: String,
}

/// W→C `reduce_done`
#[derive(Clone, PartialEq, prost::Message)]
pub struct ReduceDone {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub slave_id: String,
}

/// C→W `map`
#[derive(Clone, PartialEq, prost::Message)]
pub struct MapTask {
    #[prost(string, tag = "1")]
    pub file_name: String,
}

/// C→W `reduce`
#[derive(Clone, PartialEq, prost::Message)]
pub struct ReduceTask {
    #[prost(string, repeated, tag = "1")]
    pub dict_list: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub word_list: Vec<String>,
    #[prost(string, tag = "3")]
    pub slave_id: String,
}

/// C→W `idle`: nothing to hand out right now
#[derive(Clone, PartialEq, prost::Message)]
pub struct NoWork {}

/// C→W `done`: job finished
#[derive(Clone, PartialEq, prost::Message)]
pub struct JobDone {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    #[prost(oneof = "envelope::Body", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub body: Option<envelope::Body>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        Poll(super::Poll),
        #[prost(message, tag = "2")]
        MapDone(super::MapDone),
        #[prost(message, tag = "3")]
        ReduceDone(super::ReduceDone),
        #[prost(message, tag = "4")]
        Map(super::MapTask),
        #[prost(message, tag = "5")]
        Reduce(super::ReduceTask),
        #[prost(message, tag = "6")]
        Idle(super::NoWork),
        #[prost(message, tag = "7")]
        Done(super::JobDone),
    }

    impl Body {
        /// Wire `type` of this message
        pub fn kind(&self) -> &'static str {
            match self {
                Body::Poll(_) | Body::Idle(_) => "idle",
                Body::MapDone(_) => "map_done",
                Body::ReduceDone(_) => "reduce_done",
                Body::Map(_) => "map",
                Body::Reduce(_) => "reduce",
                Body::Done(_) => "done",
            }
        }
    }
}

use envelope::Body;

/// Worker → coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Poll {
        worker_id: String,
    },
    MapDone {
        worker_id: String,
        partition: String,
        result_ref: String,
    },
    ReduceDone {
        worker_id: String,
        partition: String,
    },
}

/// Coordinator → worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Map {
        partition: String,
    },
    Reduce {
        partition: String,
        results: Vec<String>,
        keys: Vec<String>,
    },
    Idle,
    Done,
}

impl From<Request> for Envelope {
    fn from(request: Request) -> Self {
        let body = match request {
            Request::Poll { worker_id } => Body::Poll(Poll { id: worker_id }),
            Request::MapDone {
                worker_id,
                partition,
                result_ref,
            } => Body::MapDone(MapDone {
                id: worker_id,
                file_name: partition,
                dict_name: result_ref,
            }),
            Request::ReduceDone {
                worker_id,
                partition,
            } => Body::ReduceDone(ReduceDone {
                id: worker_id,
                slave_id: partition,
            }),
        };
        Envelope { body: Some(body) }
    }
}

impl TryFrom<Envelope> for Request {
    type Error = CodecError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        match envelope.body.ok_or(CodecError::MissingBody)? {
            Body::Poll(m) => Ok(Request::Poll { worker_id: m.id }),
            Body::MapDone(m) => Ok(Request::MapDone {
                worker_id: m.id,
                partition: m.file_name,
                result_ref: m.dict_name,
            }),
            Body::ReduceDone(m) => Ok(Request::ReduceDone {
                worker_id: m.id,
                partition: m.slave_id,
            }),
            other => Err(CodecError::UnexpectedMessage { kind: other.kind() }),
        }
    }
}

impl From<Response> for Envelope {
    fn from(response: Response) -> Self {
        let body = match response {
            Response::Map { partition } => Body::Map(MapTask {
                file_name: partition,
            }),
            Response::Reduce {
                partition,
                results,
                keys,
            } => Body::Reduce(ReduceTask {
                dict_list: results,
                word_list: keys,
                slave_id: partition,
            }),
            Response::Idle => Body::Idle(NoWork {}),
            Response::Done => Body::Done(JobDone {}),
        };
        Envelope { body: Some(body) }
    }
}

impl TryFrom<Envelope> for Response {
    type Error = CodecError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        match envelope.body.ok_or(CodecError::MissingBody)? {
            Body::Map(m) => Ok(Response::Map {
                partition: m.file_name,
            }),
            Body::Reduce(m) => Ok(Response::Reduce {
                partition: m.slave_id,
                results: m.dict_list,
                keys: m.word_list,
            }),
            Body::Idle(_) => Ok(Response::Idle),
            Body::Done(_) => Ok(Response::Done),
            other => Err(CodecError::UnexpectedMessage { kind: other.kind() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_and_idle_share_the_wire_type() {
        let poll: Envelope = Request::Poll {
            worker_id: "Slave0".into(),
        }
        .into();
        let idle: Envelope = Response::Idle.into();
        assert_eq!(poll.body.as_ref().map(Body::kind), Some("idle"));
        assert_eq!(idle.body.as_ref().map(Body::kind), Some("idle"));
        assert_ne!(poll, idle);
    }

    #[test]
    fn map_done_uses_wire_field_names() {
        let envelope: Envelope = Request::MapDone {
            worker_id: "Slave1".into(),
            partition: "file_0.txt".into(),
            result_ref: "out/file_0.txt.json".into(),
        }
        .into();
        match envelope.body {
            Some(Body::MapDone(m)) => {
                assert_eq!(m.id, "Slave1");
                assert_eq!(m.file_name, "file_0.txt");
                assert_eq!(m.dict_name, "out/file_0.txt.json");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn response_is_not_a_request() {
        let envelope: Envelope = Response::Done.into();
        let err = Request::try_from(envelope).unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnexpectedMessage { kind: "done" }
        ));
    }

    #[test]
    fn empty_envelope_is_rejected() {
        let err = Response::try_from(Envelope { body: None }).unwrap_err();
        assert!(matches!(err, CodecError::MissingBody));
    }
}
