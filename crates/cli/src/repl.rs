//! The interactive loop.
//!
//! Free text goes to the agent; the reserved words `stats`, `report`,
//! `reset`, `skip`, and `quit`/`exit` are handled locally. Esc (or Ctrl-C)
//! while a clarification is waiting skips it; Ctrl-C otherwise saves all
//! state and exits without archiving, so the session can be resumed.

use rustyline::error::ReadlineError;
use rustyline::{Cmd, DefaultEditor, EventHandler, KeyCode, KeyEvent, Modifiers};

use maestro_agent::Agent;
use maestro_domain::config::{Config, UiMode};
use maestro_mcp::ConnectionManager;

pub async fn run(
    agent: &mut Agent,
    manager: &ConnectionManager,
    config: &Config,
) -> anyhow::Result<()> {
    if config.ui.mode != UiMode::Quiet {
        banner(agent, manager);
    }

    // A session resumed mid-clarification still owes the user a question.
    if let Some(question) = agent.pending_question() {
        println!("\n{question}\n");
    }

    let mut rl = DefaultEditor::new()?;
    // Esc behaves like an interrupt so a pending clarification can be
    // skipped without typing anything.
    rl.bind_sequence(
        KeyEvent(KeyCode::Esc, Modifiers::NONE),
        EventHandler::Simple(Cmd::Interrupt),
    );

    let history_path = config.agent.state_dir.join("repl_history.txt");
    let _ = rl.load_history(&history_path);

    loop {
        match rl.readline("maestro> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                match input.to_ascii_lowercase().as_str() {
                    "quit" | "exit" => break,
                    "stats" => {
                        println!("{}", agent.stats());
                        continue;
                    }
                    "report" => {
                        println!("{}", agent.report());
                        continue;
                    }
                    "reset" => {
                        agent.reset()?;
                        println!("Tasks and conversation history cleared.");
                        continue;
                    }
                    "skip" if agent.is_awaiting() => {
                        println!("{}", agent.skip_clarification()?);
                        continue;
                    }
                    _ => {}
                }

                // Ctrl-C while the agent is waiting on the LLM or a tool
                // aborts the in-flight work; paused tasks stay resumable.
                let interrupted = tokio::select! {
                    result = agent.process_request(input) => {
                        match result {
                            Ok(answer) => println!("\n{answer}\n"),
                            Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
                        }
                        false
                    }
                    _ = tokio::signal::ctrl_c() => true,
                };
                if interrupted {
                    println!("\nSaving session state...");
                    agent.pause()?;
                    let _ = rl.save_history(&history_path);
                    eprintln!("Paused session {}. Bye.", agent.session_id());
                    return Ok(());
                }
            }
            Err(ReadlineError::Interrupted) => {
                if agent.is_awaiting() {
                    match agent.skip_clarification() {
                        Ok(message) => println!("\n{message}"),
                        Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
                    }
                    continue;
                }
                // Ctrl-C outside a clarification: save and leave the
                // session resumable.
                println!("\nSaving session state...");
                agent.pause()?;
                let _ = rl.save_history(&history_path);
                eprintln!("Paused session {}. Bye.", agent.session_id());
                return Ok(());
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    agent.close()?;
    eprintln!("Closed session {}. Bye.", agent.session_id());
    Ok(())
}

fn banner(agent: &Agent, manager: &ConnectionManager) {
    eprintln!("Maestro agent runtime");
    eprintln!(
        "Connected: {} server(s), {} tool(s)  |  session {}",
        manager.server_count(),
        manager.tool_count(),
        agent.session_id(),
    );
    eprintln!("Commands: stats, report, reset, quit/exit. Esc skips a pending question.");
    eprintln!("{}", "-".repeat(60));
}
