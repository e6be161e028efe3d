//! Synthetic capture helper.
//!
//! Speaks the same framed protocol a real capture helper would, but
//! never touches hardware: `Open` succeeds immediately and the helper
//! starts emitting synthetic `DataReport`s at a fixed rate, with signal
//! strength and GPS drifting via a simple random walk. Used by
//! `VirtualScanDriver` for demos/tests and by `LocalWifiDriver` when
//! `CAPTRACE_WIFI_HELPER` isn't overridden to a real capture binary.

use std::time::Duration;

use clap::Parser;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;

use captrace::types::{adler32, DataReport, Gps, OpenReport, Signal};
use captrace::wire::{v3, Ack, AckKind, Command, CommandKind, Frame, ProtoVersion, FRAME_HEADER_LEN, MAX_FRAME_SIZE};

#[derive(Parser, Debug)]
#[command(name = "capture-sim")]
#[command(about = "Synthetic capture helper speaking the captrace framed protocol")]
struct Args {
    /// Interface name this helper pretends to capture from.
    #[arg(long, default_value = "sim0")]
    interface: String,

    /// Present for parity with real helpers; this binary is always synthetic.
    #[arg(long)]
    synthetic: bool,

    /// Reports emitted per second while running.
    #[arg(long, default_value = "2.0")]
    report_rate_hz: f64,

    /// Link-layer DLT reported on open (127 = DLT_IEEE802_11_RADIO).
    #[arg(long, default_value = "127")]
    dlt: u32,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(64);
    tokio::spawn(read_commands(cmd_tx));

    run(args, cmd_rx).await;
}

/// Read framed commands off stdin and forward the decoded `Command`s.
async fn read_commands(tx: mpsc::Sender<Command>) {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);

    loop {
        let mut header = [0u8; FRAME_HEADER_LEN];
        if reader.read_exact(&mut header).await.is_err() {
            return; // parent closed stdin
        }
        let size = u32::from_be_bytes(header[5..9].try_into().unwrap());
        if size > MAX_FRAME_SIZE {
            return;
        }
        let mut buf = vec![0u8; FRAME_HEADER_LEN + size as usize];
        buf[..FRAME_HEADER_LEN].copy_from_slice(&header);
        if reader.read_exact(&mut buf[FRAME_HEADER_LEN..]).await.is_err() {
            return;
        }
        let Ok(frame) = Frame::decode(&buf) else { continue };
        let Ok(command) = v3::decode_command(&frame.content) else { continue };
        if tx.send(command).await.is_err() {
            return;
        }
    }
}

async fn write_ack(writer: &mut BufWriter<tokio::io::Stdout>, seqno: u32, ack: Ack) {
    let Ok(content) = v3::encode_ack(&ack) else { return };
    let frame = Frame::new(ProtoVersion::V3, seqno, content);
    let _ = writer.write_all(&frame.encode()).await;
    let _ = writer.flush().await;
}

async fn write_report(writer: &mut BufWriter<tokio::io::Stdout>, report: DataReport) {
    let ack = Ack { seqno: 0, success: true, message: None, kind: AckKind::Report(report) };
    write_ack(writer, 0, ack).await;
}

async fn run(args: Args, mut cmd_rx: mpsc::Receiver<Command>) {
    let mut writer = BufWriter::new(tokio::io::stdout());
    let key = adler32(args.interface.as_bytes());
    let mut running = false;
    let mut rng = rand::thread_rng();
    let signal_walk = Normal::new(0.0, 2.0).expect("valid normal distribution");
    let mut dbm: f64 = -60.0;
    let mut lat = 37.7749;
    let mut lon = -122.4194;

    let period = Duration::from_secs_f64(1.0 / args.report_rate_hz.max(0.1));
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                let Some(command) = command else { return };
                match command.kind {
                    CommandKind::Probe { .. } => {
                        write_ack(&mut writer, command.seqno, Ack {
                            seqno: command.seqno,
                            success: true,
                            message: None,
                            kind: AckKind::ProbeResult { supported: true, caps: 0 },
                        }).await;
                    }
                    CommandKind::ListInterfaces => {
                        write_ack(&mut writer, command.seqno, Ack {
                            seqno: command.seqno,
                            success: true,
                            message: None,
                            kind: AckKind::InterfaceList { interfaces: vec![args.interface.clone()] },
                        }).await;
                    }
                    CommandKind::Open { .. } => {
                        running = true;
                        let report = OpenReport {
                            dlt: args.dlt,
                            capture_interface: Some(args.interface.clone()),
                            hardware: Some("capture-sim".to_string()),
                            channels: default_channels(),
                            channel: default_channels().first().cloned(),
                            extra: Default::default(),
                        };
                        write_ack(&mut writer, command.seqno, Ack {
                            seqno: command.seqno,
                            success: true,
                            message: None,
                            kind: AckKind::OpenResult(report),
                        }).await;
                    }
                    CommandKind::SetChannel { .. } | CommandKind::SetChanset { .. } => {
                        write_ack(&mut writer, command.seqno, Ack {
                            seqno: command.seqno,
                            success: true,
                            message: None,
                            kind: AckKind::ChannelSet,
                        }).await;
                    }
                    CommandKind::Ping => {
                        write_ack(&mut writer, command.seqno, Ack {
                            seqno: command.seqno,
                            success: true,
                            message: None,
                            kind: AckKind::Pong,
                        }).await;
                    }
                    CommandKind::Pong => {}
                    CommandKind::Close => {
                        write_ack(&mut writer, command.seqno, Ack {
                            seqno: command.seqno,
                            success: true,
                            message: None,
                            kind: AckKind::Closed,
                        }).await;
                        return;
                    }
                }
            }
            _ = interval.tick(), if running => {
                dbm += signal_walk.sample(&mut rng);
                dbm = dbm.clamp(-95.0, -30.0);
                lat += rng.gen_range(-0.0001..0.0001);
                lon += rng.gen_range(-0.0001..0.0001);

                let report = DataReport::Json {
                    dlt: args.dlt,
                    json: serde_json::json!({ "source_key": key, "synthetic": true }),
                    gps: Some(Gps { lat, lon, alt: Some(10.0), speed: None, fix: 3, ts_sec: 0, ts_usec: 0 }),
                    signal: Some(Signal { dbm: Some(dbm), channel: Some(6), ..Default::default() }),
                };
                write_report(&mut writer, report).await;
            }
        }
    }
}

fn default_channels() -> Vec<String> {
    vec!["1".into(), "6".into(), "11".into()]
}
