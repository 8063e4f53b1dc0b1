use relayftp::{
    Direction, FtpResult, Response, Session, TransferRegistry, TransferReport,
};

/// Print the raw text of a reply, as the server sent it
fn print_reply(reply: &Response) {
    print!("{}", reply.raw_text());
}

/// Print the reply of a control exchange or the error which prevented it
fn show(action: &str, result: FtpResult<Response>) {
    match result {
        Ok(reply) => print_reply(&reply),
        Err(err) => eprintln!("{action} error: {err}"),
    }
}

pub fn user(session: &Session, user: &str) {
    show("USER", session.user(user));
}

pub fn pass(session: &Session, password: Option<String>) {
    let password = match password {
        Some(password) => password,
        None => match rpassword::prompt_password("Password: ") {
            Ok(password) => password,
            Err(err) => {
                eprintln!("Failed to read password: {err}");
                return;
            }
        },
    };
    show("PASS", session.pass(password));
}

pub fn pasv(session: &mut Session) {
    show("PASV", session.enter_passive());
}

pub fn port(session: &mut Session) {
    show("PORT", session.enter_active());
}

pub fn mkd(session: &Session, path: &str) {
    show("MKD", session.mkdir(path));
}

pub fn pwd(session: &Session) {
    show("PWD", session.pwd());
}

pub fn dele(session: &Session, file: &str) {
    show("DELE", session.rm(file));
}

pub fn rest(session: &mut Session, offset: &str) {
    show("REST", session.resume_transfer(offset));
}

pub fn quit(session: &mut Session) {
    show("QUIT", session.quit());
}

/// Launch a transfer in the background; returns as soon as the server accepted it
pub fn transfer(
    session: &mut Session,
    transfers: &mut TransferRegistry,
    direction: Direction,
    filename: &str,
) {
    // checked first: a refused transfer must not consume the negotiation
    if !transfers.has_capacity() {
        eprintln!(
            "Too many transfers running ({}); wait for one to finish",
            transfers.capacity()
        );
        return;
    }
    let transfer = match session.begin_transfer(direction, filename) {
        Ok(transfer) => transfer,
        Err(err) => {
            eprintln!("Cannot start {direction} of {filename}: {err}");
            return;
        }
    };
    let mode = transfer.mode();
    match transfers.spawn(transfer) {
        Ok(id) => println!("Transfer #{id} started: {direction} of {filename} ({mode} mode)"),
        Err(err) => eprintln!("Cannot start {direction} of {filename}: {err}"),
    }
}

pub fn jobs(session: &Session, transfers: &TransferRegistry) {
    match session.mode() {
        Some(mode) => println!("Next transfer: {mode} mode"),
        None => println!("Next transfer: not negotiated (use PASV or PORT)"),
    }
    if let Some(offset) = session.restart_offset() {
        println!("Next transfer resumes at byte {offset}");
    }
    println!("Local directory: {}", session.get_local_dir().display());
    let running = transfers.in_flight();
    if running.is_empty() {
        println!("No transfers running");
    }
    for info in running {
        println!(
            "#{}\t{}\t{}\t{}",
            info.id, info.direction, info.mode, info.filename
        );
    }
}

pub fn report(reports: Vec<TransferReport>) {
    for report in reports {
        if let Some(completion) = report.completion.as_ref() {
            print_reply(completion);
        }
        if report.is_success() {
            println!("{report}");
        } else {
            eprintln!("{report}");
        }
    }
}
