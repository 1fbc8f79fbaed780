use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use reel::client::PlayerConfig;
use reel::media::synthetic::{PassthroughDecoder, SyntheticLibrary, TagDecoder};
use reel::media::PlaybackSink;
use reel::search::SearchService;
use reel::{Quality, Server, Speed, StreamOrchestrator};

#[derive(Parser)]
#[command(name = "reel", about = "VCR-style media streaming over RTSP/RTP-like protocols")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a synthetic media catalog.
    Serve {
        /// Control bind address (host:port)
        #[arg(long, short, default_value = "0.0.0.0:8554")]
        bind: String,
        /// Search service bind address (host:port)
        #[arg(long, default_value = "0.0.0.0:8560")]
        search_bind: String,
        /// Frames per synthetic resource
        #[arg(long, default_value_t = 900)]
        frames: u64,
        /// Frame rate of the synthetic resources
        #[arg(long, default_value_t = 30)]
        fps: u32,
    },
    /// Stream a resource and drive it from stdin commands.
    Play {
        /// Control server address (host:port)
        #[arg(long, short, default_value = "127.0.0.1:8554")]
        server: String,
        /// Resource name to stream
        #[arg(long, short, default_value = "demo.mp4")]
        resource: String,
        /// First media port to bind (audio uses port + 2)
        #[arg(long, default_value_t = 44444)]
        rtp_port: u16,
    },
}

/// Headless sink that reports progress once a second of stream time.
struct ProgressSink {
    label: &'static str,
    every: u64,
    count: u64,
}

impl ProgressSink {
    fn new(label: &'static str, every: u64) -> Self {
        Self {
            label,
            every: every.max(1),
            count: 0,
        }
    }
}

impl PlaybackSink for ProgressSink {
    fn present(&mut self, unit: &[u8]) {
        if self.count % self.every == 0 {
            tracing::info!(stream = self.label, units = self.count, bytes = unit.len(), "playing");
        }
        self.count += 1;
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    match Args::parse().command {
        Command::Serve {
            bind,
            search_bind,
            frames,
            fps,
        } => serve(&bind, &search_bind, frames, fps),
        Command::Play {
            server,
            resource,
            rtp_port,
        } => play(&server, &resource, rtp_port),
    }
}

fn serve(bind: &str, search_bind: &str, frames: u64, fps: u32) {
    let library = Arc::new(SyntheticLibrary::new(
        vec!["demo.mp4".into(), "trailer.mkv".into(), "lecture.avi".into()],
        frames,
        fps,
    ));

    let mut server = Server::new(bind, library.clone());
    if let Err(e) = server.start() {
        eprintln!("failed to start server: {e}");
        return;
    }

    let mut search_service = SearchService::new(search_bind, library);
    if let Err(e) = search_service.start() {
        eprintln!("failed to start search service: {e}");
        server.stop();
        return;
    }

    println!("serving on {bind} (search on {search_bind}) — press Enter to stop");
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);

    search_service.stop();
    server.stop();
}

fn play(server: &str, resource: &str, rtp_port: u16) {
    // Report roughly once per second of stream time.
    let fps_guess: u64 = 30;
    let mut player = match StreamOrchestrator::connect(
        PlayerConfig {
            server_addr: server.to_string(),
            resource: resource.to_string(),
            rtp_base_port: rtp_port,
        },
        Box::new(TagDecoder),
        Box::new(ProgressSink::new("video", fps_guess)),
        Box::new(PassthroughDecoder),
        Box::new(ProgressSink::new("audio", fps_guess)),
    ) {
        Ok(player) => player,
        Err(e) => {
            eprintln!("failed to connect: {e}");
            return;
        }
    };

    if let Err(e) = player
        .describe()
        .and_then(|()| player.setup())
        .and_then(|()| player.play(None))
    {
        eprintln!("failed to start playback: {e}");
        return;
    }

    println!(
        "streaming {resource} ({:.1}s) — commands: play, pause, ff, rw, seek <0-1000>, \
         speed <1|2>, quality <0|1>, align <secs>, mute, pos, quit",
        player.total_secs()
    );

    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let mut words = line.split_whitespace();
        let result = match (words.next(), words.next()) {
            (Some("play"), _) => player.play(None),
            (Some("pause"), _) => player.pause(),
            (Some("ff"), _) => player.forward(10.0),
            (Some("rw"), _) => player.backward(10.0),
            (Some("seek"), Some(pos)) => match pos.parse() {
                Ok(per_mille) => player.pause().and_then(|()| player.play(Some(per_mille))),
                Err(_) => {
                    println!("seek takes a position in 0-1000");
                    Ok(())
                }
            },
            (Some("speed"), Some(s)) => {
                match s.parse().ok().and_then(Speed::from_multiplier) {
                    Some(speed) => player.set_speed(speed),
                    None => {
                        println!("speed is 1 or 2");
                        Ok(())
                    }
                }
            }
            (Some("quality"), Some(level)) => {
                match level.parse().ok().and_then(Quality::from_level) {
                    Some(quality) => player.set_quality(quality),
                    None => {
                        println!("quality is 0 (blur) or 1 (hd)");
                        Ok(())
                    }
                }
            }
            (Some("align"), Some(secs)) => match secs.parse() {
                Ok(seconds) => player.align_audio(seconds),
                Err(_) => {
                    println!("align takes seconds (float)");
                    Ok(())
                }
            },
            (Some("mute"), _) => {
                let muted = player.toggle_mute();
                println!("{}", if muted { "muted" } else { "unmuted" });
                Ok(())
            }
            (Some("pos"), _) => {
                println!(
                    "{:.1}s / {:.1}s ({}‰)",
                    player.elapsed_secs(),
                    player.total_secs(),
                    player.position_permille()
                );
                Ok(())
            }
            (Some("quit"), _) | (Some("q"), _) => break,
            (Some(other), _) => {
                println!("unknown command: {other}");
                Ok(())
            }
            (None, _) => Ok(()),
        };
        if let Err(e) = result {
            eprintln!("command failed: {e}");
        }
    }

    if let Err(e) = player.teardown() {
        eprintln!("teardown failed: {e}");
    }
}
