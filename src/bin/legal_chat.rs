use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use log::warn;
use tokio::io::{AsyncBufReadExt, BufReader};

use legal_pdf_analyzer::client::{AnalyzerClient, Session, SessionError, UploadedDocument, View};

/// Terminal front-end for the legal document analyzer.
#[derive(Parser, Debug)]
#[command(name = "legal-chat", version, about)]
struct Args {
    /// Base URL of a running analyzer server
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// PDF to select on startup
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Open(PathBuf),
    Analyze,
    Show(View),
    Quit,
    Help,
    Ask(String),
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix(':') else {
        return Command::Ask(line.to_string());
    };
    let (name, arg) = rest
        .split_once(char::is_whitespace)
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((rest, ""));
    match name {
        "open" if !arg.is_empty() => Command::Open(PathBuf::from(arg)),
        "analyze" => Command::Analyze,
        "upload" => Command::Show(View::Upload),
        "summary" => Command::Show(View::Summary),
        "chat" => Command::Show(View::Chat),
        "quit" | "q" => Command::Quit,
        "help" => Command::Help,
        _ => Command::Unknown(trimmed.to_string()),
    }
}

const HELP: &str = "commands: :open <path>  :analyze  :upload  :summary  :chat  :quit
anything else is sent as a question once a document has been analyzed";

// Transitions the session refused; the terminal state is left as it was
fn log_refused(result: Result<(), SessionError>) {
    if let Err(e) = result {
        warn!("Session transition refused: {}", e);
    }
}

fn select(session: &mut Session, path: &Path) {
    match UploadedDocument::from_path(path) {
        Ok(document) => {
            let name = document.name.clone();
            match session.select_file(document) {
                Ok(()) => println!("selected {}", name),
                Err(e) => println!("cannot select {}: {}", name, e),
            }
        }
        Err(e) => println!("cannot read {}: {}", path.display(), e),
    }
}

async fn analyze(session: &mut Session, client: &AnalyzerClient) {
    let document = match session.begin_analysis() {
        Ok(document) => document,
        Err(e) => {
            println!("{}", e);
            return;
        }
    };
    println!("analyzing {}...", document.name);
    log_refused(session.upload_sent());

    match client.analyze(&document).await {
        Ok(summary) => {
            log_refused(session.complete_analysis(summary));
            render(session);
        }
        Err(e) => {
            warn!("Analysis failed: {}", e);
            println!("analysis failed");
            log_refused(session.fail_analysis());
        }
    }
}

async fn ask(session: &mut Session, client: &AnalyzerClient, question: String) {
    if session.view() != View::Chat {
        if let Err(e) = session.show(View::Chat) {
            println!("{}", e);
            return;
        }
    }
    session.set_input(question);
    let request = match session.begin_chat() {
        Ok(request) => request,
        Err(e) => {
            println!("{}", e);
            return;
        }
    };

    print!("assistant: ");
    let _ = std::io::stdout().flush();
    let result = client
        .chat(&request, |delta| {
            log_refused(session.push_delta(delta));
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        })
        .await;
    println!();
    if let Err(e) = result {
        warn!("Chat failed: {}", e);
        println!("(reply interrupted)");
    }
    log_refused(session.finish_chat());
}

fn render(session: &Session) {
    match session.view() {
        View::Upload => match session.file() {
            Some(file) => println!("[upload] {} selected; :analyze to continue", file.name),
            None => println!("[upload] no file selected; :open <path>"),
        },
        View::Summary => {
            println!("[summary]");
            println!("{}", session.summary().unwrap_or_default());
        }
        View::Chat => {
            println!("[chat]");
            for message in session.conversation() {
                println!("{:?}: {}", message.role, message.content);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("warn"));
    let args = Args::parse();

    let client = AnalyzerClient::new(args.server);
    let mut session = Session::new();
    if let Some(path) = &args.file {
        select(&mut session, path);
    }
    println!("{}", HELP);
    render(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Command::Open(path) => select(&mut session, &path),
            Command::Analyze => analyze(&mut session, &client).await,
            Command::Show(view) => match session.show(view) {
                Ok(()) => render(&session),
                Err(e) => println!("{}", e),
            },
            Command::Quit => break,
            Command::Help => println!("{}", HELP),
            Command::Ask(question) => ask(&mut session, &client, question).await,
            Command::Unknown(cmd) => println!("unknown command {}; :help for a list", cmd),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use legal_pdf_analyzer::client::Phase;

    #[test]
    fn colon_lines_are_commands() {
        assert_eq!(parse_command(":open  ~/lease.pdf "), Command::Open(PathBuf::from("~/lease.pdf")));
        assert_eq!(parse_command(":analyze"), Command::Analyze);
        assert_eq!(parse_command(" :summary"), Command::Show(View::Summary));
        assert_eq!(parse_command(":chat"), Command::Show(View::Chat));
        assert_eq!(parse_command(":q"), Command::Quit);
        assert_eq!(parse_command(":open"), Command::Unknown(":open".into()));
    }

    #[test]
    fn other_lines_are_questions() {
        assert_eq!(
            parse_command("What is the termination clause?"),
            Command::Ask("What is the termination clause?".into())
        );
        assert_eq!(parse_command("   "), Command::Ask("   ".into()));
    }

    #[tokio::test]
    async fn failed_analysis_settles_the_session() {
        let mut session = Session::new();
        session
            .select_file(UploadedDocument::new("lease.pdf", "application/pdf", b"%PDF-1.4".to_vec()))
            .unwrap();
        // Nothing listens on the discard port
        let client = AnalyzerClient::new("http://127.0.0.1:9");

        analyze(&mut session, &client).await;

        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.can_analyze());
    }

    #[test]
    fn refused_transitions_leave_the_session_untouched() {
        let mut session = Session::new();
        log_refused(session.finish_chat());
        log_refused(session.upload_sent());
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.view(), View::Upload);
    }
}
