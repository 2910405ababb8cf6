//! SRV Lookup Example
//!
//! This example resolves a service name with rtc-srv against an in-memory
//! resolver service seeded from the command line.
//!
//! # Usage
//!
//! ```
//! cargo run --package rtc-srv --example srv_lookup -- \
//!     --service _http._tcp.example.com \
//!     --record 10:60:443:a.example.com --record 20:0:443:b.example.com
//! ```
//!
//! A service name without records never answers, which shows the timeout:
//! ```
//! cargo run --package rtc-srv --example srv_lookup -- --timeout 2
//! ```

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use rtc_srv::{
    Error, MemoryDnsService, OperationHandle, OperationQueue, SrvRecord, SrvResolver,
    SrvResolverConfig, SrvResolverDelegate,
};

#[derive(Parser, Debug)]
#[command(name = "SRV Lookup")]
#[command(version = "0.1.0")]
#[command(about = "An example of SRV resolution using rtc-srv run-loop operations")]
struct Args {
    /// Service name to resolve
    #[arg(long, default_value = "_http._tcp.example.com")]
    service: String,

    /// Record served for the service name, as priority:weight:port:target
    #[arg(long = "record", value_parser = parse_record)]
    records: Vec<SrvRecord>,

    /// Lookup timeout in seconds, 0 waits forever
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Cancel the lookup after this many milliseconds
    #[arg(long)]
    cancel_after: Option<u64>,
}

fn parse_record(s: &str) -> Result<SrvRecord, String> {
    let fields: Vec<&str> = s.splitn(4, ':').collect();
    let [priority, weight, port, target] = fields.as_slice() else {
        return Err(format!("expected priority:weight:port:target, got {s:?}"));
    };
    let number = |field: &str| {
        field
            .parse::<u16>()
            .map_err(|err| format!("invalid number {field:?}: {err}"))
    };
    Ok(SrvRecord::new(
        number(*priority)?,
        number(*weight)?,
        number(*port)?,
        *target,
    ))
}

struct Printer {
    done: Mutex<mpsc::Sender<Option<Error>>>,
}

impl SrvResolverDelegate for Printer {
    fn on_result(&self, service_name: &str, record: SrvRecord) {
        log::info!("{service_name}: {record}");
    }

    fn on_finish(&self, service_name: &str, error: Option<Error>) {
        match &error {
            Some(err) => log::warn!("{service_name}: lookup failed: {err}"),
            None => log::info!("{service_name}: lookup complete"),
        }
        let _ = self
            .done
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .send(error);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut service = MemoryDnsService::new();
    service = if args.records.is_empty() {
        service.with_silent_name(&args.service)
    } else {
        service.with_records(&args.service, args.records.clone())
    };

    let (tx, rx) = mpsc::channel();
    let printer = Arc::new(Printer {
        done: Mutex::new(tx),
    });

    let config = SrvResolverConfig::new(args.service.clone(), Arc::new(service))
        .with_timeout(Duration::from_secs(args.timeout))
        .with_delegate(&printer);
    let resolver = OperationHandle::new(SrvResolver::new(config)?);

    let queue = OperationQueue::new("srv-lookup")?;
    log::info!(
        "Resolving '{}' ({} record(s), timeout={}s)",
        args.service,
        args.records.len(),
        args.timeout
    );
    queue.add_operation(resolver.clone());

    let error = match args.cancel_after {
        Some(ms) => match rx.recv_timeout(Duration::from_millis(ms)) {
            Ok(error) => error,
            Err(_) => {
                log::info!("Cancelling after {ms}ms");
                queue.cancel_all_operations();
                rx.recv()?
            }
        },
        None => rx.recv()?,
    };

    match error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
