//! Console front-end
//! Mode selection, input validation with re-prompting, and result reporting

use std::io::{self, Write};
use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use smartflood::{
    AdaptiveSearch, ProtocolConfig, RunnerConfig, SearchConfig, TestParams, TestResult, TestRunner,
    TransportConfig,
};

/// Device id used for one-off manual runs.
const MANUAL_DEVICE_ID: u8 = 254;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run the automatic rate search instead of a single manual test
    #[arg(long)]
    auto: bool,

    /// Packets per second for a manual test (1-1000); prompted if omitted
    #[arg(long)]
    rate: Option<u32>,

    /// Test duration in seconds; prompted if omitted
    #[arg(long)]
    duration: Option<u32>,

    /// UDP port the device listens and replies on
    #[arg(long, default_value_t = 8888)]
    port: u16,

    /// Where to aim request datagrams (defaults to broadcast on --port)
    #[arg(long)]
    target: Option<SocketAddr>,

    /// Print the manual-mode result as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report {
    packets_per_second: u32,
    duration_secs: u32,
    sent_packets: u64,
    received_packets: u64,
    lost_packets: i64,
    /// Absent when nothing was sent and the percentage is undefined.
    loss_percent: Option<f64>,
}

impl Report {
    fn new(params: &TestParams, result: &TestResult) -> Self {
        Self {
            packets_per_second: params.packets_per_second,
            duration_secs: params.duration_secs,
            sent_packets: result.sent_packets,
            received_packets: result.received_packets,
            lost_packets: result.lost_packets(),
            loss_percent: (!result.loss_percent().is_nan()).then(|| result.loss_percent()),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let runner = TestRunner::new(runner_config(&args));

    let automatic = args.auto || (args.rate.is_none() && prompt_yes_no("Automatic test? [y/n]: ")?);

    if automatic {
        run_automatic(&args, &runner)
    } else {
        run_manual(&args, &runner)
    }
}

fn runner_config(args: &Args) -> RunnerConfig {
    let protocol = ProtocolConfig {
        port: args.port,
        ..ProtocolConfig::default()
    };
    let mut transport = TransportConfig::broadcast(&protocol);
    if let Some(target) = args.target {
        transport.target = target;
    }
    RunnerConfig {
        protocol,
        transport,
        ..RunnerConfig::default()
    }
}

fn run_manual(args: &Args, runner: &TestRunner) -> anyhow::Result<()> {
    let rate = match args.rate {
        Some(rate) => rate,
        None => prompt_u32("Packets per second (1 to 1000): ", |r| {
            (1..=TestParams::MAX_MANUAL_RATE).contains(&r)
        })?,
    };
    let duration = match args.duration {
        Some(duration) => duration,
        None => prompt_u32("Duration (in seconds): ", |d| d >= 1)?,
    };

    let params = TestParams::new(rate, duration, MANUAL_DEVICE_ID);
    params.validate_manual()?;

    println!();
    println!("Test running...");
    let result = runner.run(params).context("performance test failed")?;

    if args.json {
        let report = Report::new(&params, &result);
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("Sent: {} packets", result.sent_packets);
        println!("Received: {} packets", result.received_packets);
        println!(
            "Lost: {} packets ({})",
            result.lost_packets(),
            format_loss(&result)
        );
    }
    Ok(())
}

fn run_automatic(args: &Args, runner: &TestRunner) -> anyhow::Result<()> {
    let duration = match args.duration {
        Some(duration) => duration,
        None => prompt_u32("Duration per test (in seconds): ", |d| d >= 1)?,
    };

    println!();
    println!("Automatic test running...");
    println!();

    let search = AdaptiveSearch::new(SearchConfig::new(duration));
    let outcome = search.run(|params| {
        let result = runner.run(params)?;
        println!(
            "Loss at {} packets/s: {} packets ({}) (sent: {} packets)",
            params.packets_per_second,
            result.lost_packets(),
            format_loss(&result),
            result.sent_packets
        );
        Ok::<_, anyhow::Error>(result)
    })?;

    println!();
    match outcome.max_lossless_rate {
        Some(rate) => println!("Automatic test finished: {rate} packets/s sustained without loss"),
        None => println!("Automatic test finished: device lost packets at every probed rate"),
    }
    Ok(())
}

/// Loss percentage rounded to two decimals, or "undefined" for an empty run.
fn format_loss(result: &TestResult) -> String {
    let percent = result.loss_percent();
    if percent.is_nan() {
        "undefined".to_string()
    } else {
        format!("{percent:.2}%")
    }
}

fn prompt_yes_no(message: &str) -> io::Result<bool> {
    print!("{message}");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

/// Ask until the operator supplies a number passing `accept`.
fn prompt_u32(message: &str, accept: impl Fn(u32) -> bool) -> io::Result<u32> {
    loop {
        print!("{message}");
        io::stdout().flush()?;

        let mut line = String::new();
        io::stdin().read_line(&mut line)?;

        match line.trim().parse::<u32>() {
            Ok(value) if accept(value) => return Ok(value),
            _ => println!("Invalid input!"),
        }
    }
}
