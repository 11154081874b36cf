//! Interactive load client for the echo service.
//!
//! Sends a burst of probes, checks every reply, and reports round-trip
//! statistics.

use std::time::Instant;

use clap::Parser;
use protomux_client::ProtoClient;

#[path = "messages.rs"]
mod messages;

use messages::{EchoBlob, EchoProbe, EchoProto};

/// Probe an echo service and report round-trip times
#[derive(Parser, Debug)]
#[command(name = "protomux-echo-client", version, about = "echo service probe client")]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Server port
    #[arg(long)]
    port: u16,

    /// Number of probes to send
    #[arg(long, default_value = "100")]
    count: u64,

    /// Note carried in every probe
    #[arg(long, default_value = "ping")]
    note: String,

    /// Also bounce an opaque blob of this many bytes per probe
    #[arg(long, default_value = "0")]
    blob_bytes: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut client: ProtoClient<EchoProto> = ProtoClient::new();
    client.connect((args.ip.as_str(), args.port))?;
    println!("connected to {}:{}", args.ip, args.port);

    let mut worst = std::time::Duration::ZERO;
    let started = Instant::now();

    for seq in 0..args.count {
        let sent = Instant::now();
        client.send(&EchoProbe {
            seq,
            note: args.note.clone(),
        })?;

        if args.blob_bytes > 0 {
            client.send(&EchoBlob {
                body: vec![0xA5; args.blob_bytes],
            })?;
        }

        let reply: EchoProbe = client.wait_message()?;
        anyhow::ensure!(
            reply.seq == seq,
            "reply out of order: sent {seq}, got {}",
            reply.seq
        );
        anyhow::ensure!(reply.note == args.note, "reply note corrupted");

        if args.blob_bytes > 0 {
            let blob: EchoBlob = client.wait_message()?;
            anyhow::ensure!(blob.body.len() == args.blob_bytes, "blob size corrupted");
        }

        worst = worst.max(sent.elapsed());
    }

    let elapsed = started.elapsed();
    println!(
        "{} probes in {:?} ({:.0} rt/s), worst round-trip {:?}",
        args.count,
        elapsed,
        args.count as f64 / elapsed.as_secs_f64(),
        worst
    );

    client.disconnect();
    Ok(())
}
