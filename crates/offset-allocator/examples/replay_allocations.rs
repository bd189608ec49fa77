use std::{
    collections::HashMap,
    fs,
    io::{self, Read as _},
    path::PathBuf,
    process,
};

use argh::FromArgs;
use offset_allocator::{Allocation, OffsetAllocator};
use snafu::{ResultExt as _, whatever};
use snafu_utils::{GenericError, Report};
use tracing_subscriber::EnvFilter;

/// Replay an allocation script against an offset allocator.
///
/// Script lines are `alloc <name> <size>`, `free <name>`, `report`,
/// `full-report` and `reset`. `#` starts a comment.
#[derive(Debug, FromArgs)]
struct Args {
    /// size of the arena in bytes
    #[argh(option, default = "1 << 20")]
    size: u32,
    /// maximum number of regions
    #[argh(option, default = "1024")]
    max_allocs: u32,
    /// dump the region map after each step
    #[argh(switch)]
    regions: bool,
    /// script to replay (stdin if omitted)
    #[argh(positional)]
    script: Option<PathBuf>,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Args = argh::from_env();

    if let Err(err) = run(&args) {
        let report = Report::new(err);
        eprintln!("{report}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), GenericError> {
    if args.max_allocs == 0 {
        whatever!("max allocations must not be zero");
    }

    let script = match &args.script {
        Some(path) => fs::read_to_string(path).with_whatever_context(|_| {
            format!("failed to read script, path={}", path.display())
        })?,
        None => {
            let mut script = String::new();
            io::stdin()
                .read_to_string(&mut script)
                .whatever_context("failed to read script from stdin")?;
            script
        }
    };

    let mut replay = Replay {
        allocator: OffsetAllocator::new(args.size, args.max_allocs),
        live: HashMap::new(),
    };
    println!(
        "arena: size={}, max_allocs={}",
        replay.allocator.size(),
        replay.allocator.max_allocs()
    );

    for (line_no, line) in (1..).zip(script.lines()) {
        let line = line.split_once('#').map_or(line, |(code, _)| code);
        let words = line.split_whitespace().collect::<Vec<_>>();
        if words.is_empty() {
            continue;
        }
        replay.step(&words).with_whatever_context(|_| {
            format!("failed to replay line {line_no}: {}", line.trim())
        })?;
        if args.regions {
            replay.dump_regions();
        }
    }

    Ok(())
}

struct Replay<'a> {
    allocator: OffsetAllocator,
    live: HashMap<&'a str, Allocation>,
}

impl<'a> Replay<'a> {
    fn step(&mut self, words: &[&'a str]) -> Result<(), GenericError> {
        match words {
            ["alloc", name, size] => {
                let size = size
                    .parse::<u32>()
                    .with_whatever_context(|_| format!("invalid size {size:?}"))?;
                if size == 0 {
                    whatever!("allocation size must not be zero");
                }
                if self.live.contains_key(name) {
                    whatever!("allocation {name:?} is still live");
                }
                match self.allocator.allocate(size) {
                    Ok(allocation) => {
                        println!("alloc {name} {size}: offset={}", allocation.offset);
                        self.live.insert(*name, allocation);
                    }
                    Err(err) => println!("alloc {name} {size}: failed, {err}"),
                }
            }
            ["free", name] => {
                let Some(allocation) = self.live.remove(name) else {
                    whatever!("unknown allocation {name:?}");
                };
                let size = self.allocator.allocation_size(allocation);
                self.allocator.free(allocation);
                println!("free {name}: offset={}, size={size}", allocation.offset);
            }
            ["report"] => {
                let report = self.allocator.storage_report();
                println!(
                    "report: total_free_space={}, largest_free_region={}",
                    report.total_free_space, report.largest_free_region
                );
            }
            ["full-report"] => {
                let report = self.allocator.storage_report_full();
                println!("full-report: {} free regions", report.region_count());
                for regions in report.non_empty() {
                    println!("  class size {:>10}: {}", regions.size, regions.count);
                }
            }
            ["reset"] => {
                self.allocator.reset();
                self.live.clear();
                println!("reset");
            }
            _ => whatever!("malformed command {:?}", words.join(" ")),
        }
        Ok(())
    }

    fn dump_regions(&self) {
        for region in self.allocator.regions() {
            let state = if region.used { "used" } else { "free" };
            println!("  [{:>10}, {:>10}) {state}", region.offset, region.end());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_max_allocs_is_an_error() {
        let args = Args {
            size: 64,
            max_allocs: 0,
            regions: false,
            script: None,
        };
        let err = run(&args).unwrap_err();
        assert_eq!(err.to_string(), "max allocations must not be zero");
    }
}
