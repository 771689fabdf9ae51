use std::fs::{self, File};
use std::io::{BufWriter, Write};

use anyhow::{anyhow, Context};
use clap::Parser;

use janus_mr::mapreduce::apps::get_app;
use janus_mr::mapreduce::config::SequentialArgs;
use janus_mr::mapreduce::util::group_by_key;

fn main() -> anyhow::Result<()> {
    let args = SequentialArgs::parse();
    let (map_fn, reduce_fn) =
        get_app(&args.app).ok_or_else(|| anyhow!("unknown application '{}'", args.app))?;

    // read each input, pass to map, accumulate in intermediate
    let mut intermediate = vec![];
    for input in &args.inputs {
        let contents = fs::read_to_string(input)
            .with_context(|| format!("cannot read {}", input.display()))?;
        intermediate.extend(map_fn(&input.to_string_lossy(), &contents));
    }

    let out = File::create(&args.output)
        .with_context(|| format!("cannot create {}", args.output.display()))?;
    let mut out = BufWriter::new(out);

    for (key, values) in group_by_key(intermediate) {
        let values = values.iter().map(String::as_str).collect();
        writeln!(out, "{} {}", key, reduce_fn(&key, values))?;
    }
    out.flush()?;
    Ok(())
}
