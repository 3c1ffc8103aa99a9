use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{env, path::Path, process::Command};

use crate::ipc;
use crate::report::ReportSink;
use crate::{config, input};

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    // Flags-based help (-h/--help)
    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("captouch: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => {
            let r = ipc::client_request(serde_json::json!({"op":"shutdown"}))?;
            print_response(&r);
            Ok(())
        }

        Some("status") => {
            let r = ipc::client_request(serde_json::json!({"op":"status"}))?;
            print_response(&r);
            Ok(())
        }

        Some("reload") => {
            let r = ipc::client_request(serde_json::json!({"op":"reload"}))?;
            print_response(&r);
            Ok(())
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: captouch use <profile_name>"))?;
            let r = ipc::client_request(serde_json::json!({"op":"use","profile":name}))?;
            print_response(&r);
            Ok(())
        }

        Some("list") => {
            let r = ipc::client_request(serde_json::json!({"op":"list"}))?;
            print_response(&r);
            Ok(())
        }

        Some("doctor") => {
            let r = ipc::client_request(serde_json::json!({"op":"doctor"}))?;
            print_response(&r);
            Ok(())
        }

        Some("replay") => {
            // offline: run recorded frames through the active profile's
            // engines and print reports to stdout
            let path: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: captouch replay <frames.jsonl>"))?;
            let cfg = config::DaemonConfigState::load_or_install_default()?;
            let mut engines = config::build_engines(&cfg.profile)?;
            let mut reader = input::open(Path::new(&path))?;
            let mut sink = ReportSink::stdout();
            let mut frames = 0u64;
            while let Some(frame) = reader.next_frame()? {
                ipc::dispatch::dispatch_frame(&mut engines, &frame, &mut sink)?;
                frames += 1;
            }
            eprintln!("captouch: replayed {frames} frames");
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn print_help() {
    println!(
        r#"captouch — capacitive touch signal-to-touch daemon

USAGE:
  captouch help [command]          Show general or command-specific help
  captouch start                   Start the daemon
  captouch stop                    Stop the daemon
  captouch status                  Show daemon state
  captouch reload                  Reload active profile
  captouch use <name>              Switch active profile
  captouch list                    List profiles
  captouch doctor                  Diagnose profile and frame-source setup
  captouch replay <frames.jsonl>   Run recorded frames offline, reports on stdout

TIPS:
  - Profiles: ~/.config/captouch/profiles
  - Active profile pointer: ~/.config/captouch/active
  - Frames are JSON lines: {{"widget": "pad0", "diff": [0, 12, 80, ...]}}
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: captouch start\nStarts the background daemon."),
        "stop" => println!("usage: captouch stop\nStops the running daemon."),
        "status" => println!(
            "usage: captouch status\nShows enabled flag, active profile, widgets, socket."
        ),
        "reload" => println!(
            "usage: captouch reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: captouch use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => {
            println!("usage: captouch list\nLists available profiles; marks active with '*'.")
        }
        "doctor" => println!(
            "usage: captouch doctor\nChecks the active profile, frame source and report paths."
        ),
        "replay" => println!(
            "usage: captouch replay <frames.jsonl>\nRuns recorded difference-signal frames through the active profile's widgets and prints touch reports to stdout."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
