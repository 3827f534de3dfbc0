//! Mock subject binary for integration testing
//!
//! Listens on `PORT` (or `--port`), greets every connection and echoes each
//! stdin line back on stdout as `echo: <line>`.
//!
//! Options:
//!   --port N        Port to listen on (default: $PORT, then 4000)
//!   --delay-ms N    Wait before binding, to exercise the readiness probe
//!   --exit-code N   Print a message and exit immediately with N

use std::io::{BufRead, Write};
use std::net::TcpListener;
use std::time::Duration;

#[derive(Debug, Default)]
struct Options {
    port: Option<u16>,
    delay_ms: u64,
    exit_code: Option<i32>,
}

fn parse_args() -> Options {
    let mut options = Options::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let value = args.next();
        match (arg.as_str(), value.as_deref().map(str::parse::<i64>)) {
            ("--port", Some(Ok(v))) => options.port = u16::try_from(v).ok(),
            ("--delay-ms", Some(Ok(v))) => options.delay_ms = v.max(0) as u64,
            ("--exit-code", Some(Ok(v))) => options.exit_code = Some(v as i32),
            _ => {
                eprintln!("mock_subject: unrecognized argument '{arg}'");
                std::process::exit(64);
            }
        }
    }
    options
}

fn main() {
    let options = parse_args();

    if let Some(code) = options.exit_code {
        eprintln!("mock subject failing on purpose with code {code}");
        std::process::exit(code);
    }

    let port = options
        .port
        .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(4000);

    println!("mock subject starting");
    flush();
    if options.delay_ms > 0 {
        std::thread::sleep(Duration::from_millis(options.delay_ms));
    }

    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("mock subject could not bind port {port}: {e}");
            std::process::exit(1);
        }
    };
    println!("mock subject listening on 127.0.0.1:{port}");
    flush();

    std::thread::spawn(move || {
        for mut stream in listener.incoming().flatten() {
            let _ = stream.write_all(b"hello from mock subject\n");
        }
    });

    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        if line.trim() == "quit" {
            println!("mock subject quitting");
            flush();
            return;
        }
        println!("echo: {line}");
        flush();
    }

    // Input closed; keep serving until terminated
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}

fn flush() {
    let _ = std::io::stdout().flush();
}
