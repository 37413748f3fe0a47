//! Throughput benchmark for the triple buffer strategies
//!
//! A writer thread publishes an increasing counter as fast as it can, while a
//! reader thread spins on the buffer and counts how many reads observed a new
//! value. For stable numbers, pin both threads to isolated cores, e.g. boot
//! with `isolcpus=5,6 nohz_full=5,6` and run with
//! `--reader-cpu 5 --writer-cpu 6`.

use clap::{Parser, ValueEnum};
use color_eyre::eyre::WrapErr;
use std::fmt;
use std::hint::black_box;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::time::{Duration, Instant};
use tribuf::{locking, lockfree, padded, Consumer, Producer, Strategy};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Synchronization strategy to benchmark
    #[arg(value_enum)]
    strategy: StrategyName,

    /// Number of values published by the writer
    #[arg(short = 'n', long, default_value_t = 200_000_000)]
    iterations: u64,

    /// Processor to pin the writer thread to
    #[arg(long)]
    writer_cpu: Option<usize>,

    /// Processor to pin the reader thread to
    #[arg(long)]
    reader_cpu: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StrategyName {
    #[value(alias = "locking")]
    Lock,
    Lockfree,
    #[value(alias = "padded")]
    Optimized,
}

/// What a benchmark run measured
#[derive(Debug)]
struct Report {
    strategy: &'static str,
    iterations: u64,
    write_time: Duration,
    new_updates: u64,
    total_reads: u64,
    last_value: u64,
}
//
impl Report {
    fn write_ops_per_sec(&self) -> u128 {
        let nanos = self.write_time.as_nanos().max(1);
        u128::from(self.iterations) * 1_000_000_000 / nanos
    }
}
//
impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Consumer new updates: {}, total read attempts: {}, last value: {}",
            self.new_updates, self.total_reads, self.last_value
        )?;
        write!(
            f,
            "[{}] {} write ops/s",
            self.strategy,
            self.write_ops_per_sec()
        )
    }
}

/// Bind the calling thread to a single processor
#[cfg(target_os = "linux")]
fn pin_current_thread(cpu: usize) -> io::Result<()> {
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("processor {cpu} is out of range"),
        ));
    }
    // Safe because cpu_set_t is plain data and `cpu` was bounds-checked
    let result = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_current_thread(_cpu: usize) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "thread pinning is only implemented on Linux",
    ))
}

fn pin_if_requested(role: &str, cpu: Option<usize>) -> color_eyre::Result<()> {
    if let Some(cpu) = cpu {
        pin_current_thread(cpu).wrap_err_with(|| format!("Failed to pin {role} to CPU {cpu}"))?;
        log::debug!("Pinned {role} thread to CPU {cpu}");
    }
    Ok(())
}

fn bench<S>(args: &Args) -> color_eyre::Result<Report>
where
    S: Strategy<u64> + Default,
    S::Output: Send,
{
    let (mut input, mut output) = S::default().split();
    let stop = AtomicBool::new(false);
    let ready = Barrier::new(2);
    log::info!("Running {} with {} iterations", S::NAME, args.iterations);

    // Producer runs on the calling thread
    pin_if_requested("writer", args.writer_cpu)?;

    std::thread::scope(|scope| {
        // Let the consumer keep spinning to retrieve updates
        let consumer = scope.spawn(|| -> color_eyre::Result<_> {
            let pinned = pin_if_requested("reader", args.reader_cpu);
            if pinned.is_err() {
                stop.store(true, Ordering::Relaxed);
            }
            ready.wait();
            pinned?;

            let mut new_updates = 0u64;
            let mut total_reads = 0u64;
            let mut last_value = 0;
            while !stop.load(Ordering::Relaxed) {
                let (value, updated) = output.fetch();
                total_reads += 1;
                if updated {
                    new_updates += 1;
                }
                last_value = *black_box(value);
            }
            Ok((new_updates, total_reads, last_value))
        });

        // A consumer that failed to start has already raised the stop flag
        ready.wait();
        let start = Instant::now();
        if !stop.load(Ordering::Relaxed) {
            for value in 0..args.iterations {
                *input.input_buffer_mut() = value;
                input.publish();
            }
        }
        let write_time = start.elapsed();
        stop.store(true, Ordering::Relaxed);
        log::debug!("Writer done, waiting for the reader");

        let (new_updates, total_reads, last_value) = consumer
            .join()
            .unwrap_or_else(|payload| std::panic::resume_unwind(payload))?;
        Ok(Report {
            strategy: S::NAME,
            iterations: args.iterations,
            write_time,
            new_updates,
            total_reads,
            last_value,
        })
    })
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let args = Args::parse();

    let report = match args.strategy {
        StrategyName::Lock => bench::<locking::TripleBuffer<u64>>(&args)?,
        StrategyName::Lockfree => bench::<lockfree::TripleBuffer<u64>>(&args)?,
        StrategyName::Optimized => bench::<padded::TripleBuffer<u64>>(&args)?,
    };
    println!("{report}");
    Ok(())
}
