//! # relayftp
//!
//! Interactive FTP client: commands are forwarded to the server while file transfers run in
//! the background.

// -- mods
mod actions;
mod args;
mod command;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::time::Duration;

use actions::*;
use args::Args;
use command::{Command, ParseError};
use env_logger::Builder as LogBuilder;
use log::LevelFilter;
use relayftp::{Direction, ReplyFraming, Session, TransferRegistry};

const PROMPT: &str = "ftp> ";

fn usage() {
    println!("Available commands:");
    println!("DELE <file>       Remove file");
    println!("HELP              Print this help");
    println!("JOBS              List background transfers and the pending negotiation");
    println!("MKD <dir>         Make directory");
    println!("PASS [password]   Send password; prompted for if omitted");
    println!("PASV              Enter passive mode for the next transfer");
    println!("PORT              Enter active mode for the next transfer");
    println!("PWD               Print working directory");
    println!("QUIT              Wait for transfers and quit");
    println!("REST <offset>     Resume the next transfer from `offset`");
    println!("RETR <file>       Download `file` in background");
    println!("STOR <file>       Upload local `file` in background");
    println!("USER <name>       Send user name");
}

/// Read one line from stdin; `None` at end of input
fn input() -> Option<String> {
    print!("{PROMPT}");
    let _ = io::stdout().flush();
    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line),
        Err(err) => {
            eprintln!("Failed to read stdin: {err}");
            None
        }
    }
}

fn main() {
    let args: Args = argh::from_env();
    // init logger
    LogBuilder::new()
        .filter_level(if args.debug {
            LevelFilter::Trace
        } else if args.verbose {
            LevelFilter::Info
        } else {
            LevelFilter::Off
        })
        .init();

    let mut session = match Session::connect((args.host.as_str(), args.port)) {
        Ok(session) => session
            .accept_timeout(Duration::from_secs(args.accept_timeout))
            .reply_framing(if args.strict_replies {
                ReplyFraming::Strict
            } else {
                ReplyFraming::Lenient
            })
            .local_dir(args.local_dir.unwrap_or_else(|| PathBuf::from("."))),
        Err(err) => {
            eprintln!("Failed to connect to {}:{}: {err}", args.host, args.port);
            process::exit(1);
        }
    };
    if let Some(welcome) = session.get_welcome_msg() {
        print!("{}", welcome.raw_text());
    }
    let mut transfers = TransferRegistry::new(args.max_transfers);

    loop {
        report(transfers.reap());
        if session.is_broken() {
            eprintln!("Connection to the server was lost");
            report(transfers.shutdown(true));
            process::exit(1);
        }
        let Some(line) = input() else {
            break;
        };
        match Command::from_str(line.as_str()) {
            Ok(Command::Quit) => break,
            Ok(Command::Help) => usage(),
            Ok(cmd) => perform(&mut session, &mut transfers, cmd),
            Err(ParseError::Empty) => {}
            Err(err) => println!("{err}"),
        }
    }
    // let running transfers collect their completion reply before the server hangs up
    report(transfers.shutdown(false));
    if !session.is_broken() {
        quit(&mut session);
    }
}

fn perform(session: &mut Session, transfers: &mut TransferRegistry, command: Command) {
    match command {
        Command::Dele(file) => dele(session, file.as_str()),
        Command::Jobs => jobs(session, transfers),
        Command::Mkd(path) => mkd(session, path.as_str()),
        Command::Pass(password) => pass(session, password),
        Command::Pasv => pasv(session),
        Command::Port => port(session),
        Command::Pwd => pwd(session),
        Command::Rest(offset) => rest(session, offset.as_str()),
        Command::Retr(file) => transfer(session, transfers, Direction::Download, file.as_str()),
        Command::Stor(file) => transfer(session, transfers, Direction::Upload, file.as_str()),
        Command::User(name) => user(session, name.as_str()),
        Command::Help | Command::Quit => {
            panic!("Something unexpected happened")
        }
    }
}
