//! Ground-station command tool.
//!
//! Composes authenticated command frames (`<id>-<verb>&<path>@<data>#<hmac>`),
//! sends them to the simulator's TCP bridge, and prints whatever comes back
//! on the downlink. The HMAC key and satellite id come from the same JSON
//! config the firmware reads, so both ends of the link always agree.

use clap::{App, Arg, SubCommand};
use colored::*;
use lorasat::codec::HmacAuthenticator;
use lorasat::config::SatConfig;
use lorasat::image::{base64_encode, IMAGE_CHUNK_SIZE, IMAGE_MAX_CHUNKS, IMAGE_MAX_SIZE};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";

/// Spacing between frames of a multi-frame sequence (image upload).
const FRAME_SPACING_MS: u64 = 250;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("groundctl")
        .version("0.1.0")
        .about("🛰️  Ground-station console for the lorasat flight software")
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Simulator host")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Simulator port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Satellite identity config (JSON: sat_id, hmac_key_hex)")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("window")
                .short("w")
                .long("window")
                .value_name("MS")
                .help("How long to listen for downlink after the last frame")
                .takes_value(true)
                .default_value("2000")
                .global(true),
        )
        .subcommand(SubCommand::with_name("ping").about("🏓 Round-trip check"))
        .subcommand(SubCommand::with_name("status").about("📊 Request a telemetry report"))
        .subcommand(SubCommand::with_name("state").about("Mission state, boot count, antenna"))
        .subcommand(SubCommand::with_name("rad").about("SEU counter and last scrub age"))
        .subcommand(SubCommand::with_name("restart").about("Persist state and soft-reset"))
        .subcommand(
            SubCommand::with_name("force-operational")
                .about("⚠️  Skip antenna deployment and go operational"),
        )
        .subcommand(
            SubCommand::with_name("ls").about("List a directory").arg(
                Arg::with_name("dir")
                    .help("Directory path")
                    .required(true),
            ),
        )
        .subcommand(
            SubCommand::with_name("read").about("Stream a file down").arg(
                Arg::with_name("path")
                    .help("File path")
                    .required(true),
            ),
        )
        .subcommand(
            SubCommand::with_name("write")
                .about("Write a file")
                .arg(Arg::with_name("path").help("File path").required(true))
                .arg(Arg::with_name("data").help("File contents").required(true)),
        )
        .subcommand(
            SubCommand::with_name("rm").about("Delete a file").arg(
                Arg::with_name("path")
                    .help("File path")
                    .required(true),
            ),
        )
        .subcommand(
            SubCommand::with_name("image")
                .about("📷 Upload an image in base64 chunks")
                .arg(
                    Arg::with_name("file")
                        .help("Local image file (max 8 KiB)")
                        .required(true),
                )
                .arg(
                    Arg::with_name("name")
                        .long("name")
                        .value_name("PATH")
                        .help("Destination path on the satellite")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("accel")
                .about("Accelerometer recordings")
                .arg(
                    Arg::with_name("action")
                        .help("record | status | cancel | list")
                        .required(true)
                        .possible_values(&["record", "status", "cancel", "list"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("raw")
                .about("Send an arbitrary verb")
                .arg(Arg::with_name("verb").help("Command verb").required(true))
                .arg(Arg::with_name("path").help("Path field").default_value(""))
                .arg(Arg::with_name("data").help("Data field").default_value("")),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST).to_string();
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let window_ms: u64 = matches.value_of("window").unwrap_or("2000").parse()?;

    let cfg = match matches.value_of("config") {
        Some(path) => SatConfig::from_file(Path::new(path))?,
        None => SatConfig::default(),
    };
    let signer = Signer::new(&cfg);

    let frames = match matches.subcommand() {
        ("ping", _) => vec![signer.frame("Ping", "", "")],
        ("status", _) => vec![signer.frame("Status", "", "")],
        ("state", _) => vec![signer.frame("GetState", "", "")],
        ("rad", _) => vec![signer.frame("GetRadStatus", "", "")],
        ("restart", _) => vec![signer.frame("MCURestart", "", "")],
        ("force-operational", _) => vec![signer.frame("ForceOperational", "", "")],
        ("ls", Some(sub)) => {
            let dir = sub.value_of("dir").unwrap_or("/");
            vec![signer.frame("ListDir", dir, "")]
        }
        ("read", Some(sub)) => {
            let path = sub.value_of("path").unwrap_or("");
            vec![signer.frame("ReadFile", path, "")]
        }
        ("write", Some(sub)) => {
            let path = sub.value_of("path").unwrap_or("");
            let data = sub.value_of("data").unwrap_or("");
            vec![signer.frame("WriteFile", path, data)]
        }
        ("rm", Some(sub)) => {
            let path = sub.value_of("path").unwrap_or("");
            vec![signer.frame("DeleteFile", path, "")]
        }
        ("accel", Some(sub)) => {
            let verb = match sub.value_of("action").unwrap_or("status") {
                "record" => "AccelRecord",
                "cancel" => "AccelCancel",
                "list" => "AccelList",
                _ => "AccelStatus",
            };
            vec![signer.frame(verb, "", "")]
        }
        ("raw", Some(sub)) => {
            let verb = sub.value_of("verb").unwrap_or("Ping");
            let path = sub.value_of("path").unwrap_or("");
            let data = sub.value_of("data").unwrap_or("");
            vec![signer.frame(verb, path, data)]
        }
        ("image", Some(sub)) => {
            let file = sub.value_of("file").unwrap_or("");
            let leaf = Path::new(file)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image.bin".to_string());
            let fallback = format!("/{}", leaf);
            let dest = sub.value_of("name").unwrap_or(&fallback);
            match image_frames(&signer, file, dest) {
                Ok(frames) => frames,
                Err(message) => {
                    eprintln!("{} {}", "✗".red(), message.red());
                    return Ok(());
                }
            }
        }
        _ => {
            println!("{}", "No command given. Try --help.".yellow());
            println!("  {} start the simulator", "cargo run --bin lorasat-sim".bright_cyan());
            println!("  {} check the link", "groundctl ping".bright_cyan());
            return Ok(());
        }
    };

    run_session(&host, port, frames, window_ms).await
}

struct Signer {
    sat_id: String,
    auth: HmacAuthenticator,
}

impl Signer {
    fn new(cfg: &SatConfig) -> Self {
        Self {
            sat_id: cfg.sat_id.clone(),
            auth: HmacAuthenticator::new(cfg.hmac_key()),
        }
    }

    /// Compose and sign one uplink frame.
    fn frame(&self, verb: &str, path: &str, data: &str) -> String {
        let body = format!("{}-{}&{}@{}", self.sat_id, verb, path, data);
        let tag = self.auth.sign(&body);
        format!("{}#{}", body, tag)
    }
}

/// Build the ImageStart / ImageChunk* / ImageEnd frame sequence.
fn image_frames(signer: &Signer, file: &str, dest: &str) -> Result<Vec<String>, String> {
    let data = std::fs::read(file).map_err(|e| format!("cannot read {}: {}", file, e))?;
    if data.is_empty() {
        return Err("image file is empty".to_string());
    }
    if data.len() > IMAGE_MAX_SIZE as usize {
        return Err(format!(
            "image is {} bytes, limit is {}",
            data.len(),
            IMAGE_MAX_SIZE
        ));
    }
    let total_chunks = data.len().div_ceil(IMAGE_CHUNK_SIZE);
    if total_chunks > IMAGE_MAX_CHUNKS as usize {
        return Err("too many chunks".to_string());
    }

    let mut frames = vec![signer.frame(
        "ImageStart",
        dest,
        &format!("{}:{}", total_chunks, data.len()),
    )];
    for (i, chunk) in data.chunks(IMAGE_CHUNK_SIZE).enumerate() {
        frames.push(signer.frame("ImageChunk", &i.to_string(), &base64_encode(chunk)));
    }
    frames.push(signer.frame("ImageEnd", "", ""));
    Ok(frames)
}

/// Send every frame with spacing, printing downlink lines as they arrive,
/// then keep listening for the reply window.
async fn run_session(
    host: &str,
    port: u16,
    frames: Vec<String>,
    window_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} cannot reach the simulator at {}", "✗".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("  start it with: {}", "cargo run --bin lorasat-sim".bright_cyan());
            }
            return Err(e.into());
        }
    };

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let printer = tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            print_downlink(&line);
        }
    });

    for (i, frame) in frames.iter().enumerate() {
        if i > 0 {
            sleep(Duration::from_millis(FRAME_SPACING_MS)).await;
        }
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    // Let the reply stream finish.
    let _ = timeout(Duration::from_millis(window_ms), printer).await;
    Ok(())
}

fn print_downlink(line: &str) {
    if line.starts_with("ERR:") {
        println!("{} {}", "⬇".red(), line.red());
    } else if line.starts_with("OK:") || line.starts_with("PONG") {
        println!("{} {}", "⬇".green(), line.green());
    } else if line.starts_with("BEACON:") {
        println!("{} {}", "⬇".blue(), line.blue());
    } else {
        println!("{} {}", "⬇".normal(), line);
    }
}
