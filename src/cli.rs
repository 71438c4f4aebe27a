//! Command-line surface: a one-shot `ask` subcommand and a default
//! interactive REPL, both driving the same confirm/disambiguate round-trip.
//! Grounded on `cli_helper.py::process_command_turn` — log query, call the
//! agent, handle a pending confirmation by re-prompting and resubmitting
//! with the approved tool name, handle a pending disambiguation the same
//! way, then print the final output.

use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::orchestrator::{Orchestrator, TurnRequest, TurnResponse};

#[derive(Parser)]
#[command(
    name = "devops-dispatcher",
    version,
    about = "Natural-language dispatcher for Docker/Kubernetes infrastructure operations"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Ask a single question and print the answer.
    Ask {
        /// The natural-language query.
        query: String,
        /// Skip the confirmation prompt for dangerous operations.
        #[arg(long)]
        yes: bool,
        /// Restrict routing to these backends (docker, k8s_local, k8s_remote, chat).
        #[arg(long = "backend")]
        backends: Vec<String>,
    },
}

/// Drive one turn to completion, prompting on stdin for any confirmation
/// or disambiguation pause and resubmitting until the orchestrator returns
/// a final answer (or the user declines).
pub async fn run_turn(
    orchestrator: &Orchestrator,
    session_id: Uuid,
    query: String,
    auto_confirm: bool,
    forced_backends: Option<Vec<String>>,
) {
    let mut request = TurnRequest {
        session_id,
        query,
        approved_tool: None,
        forced_backends,
    };

    loop {
        let now_ts = chrono_now();
        let response: TurnResponse = orchestrator.handle_query(request.clone(), now_ts).await;

        if let Some(disambiguation) = &response.disambiguation {
            println!("\n🤔 This query is ambiguous. Please select the target:");
            let mut keys: Vec<&String> = disambiguation.options.keys().collect();
            keys.sort();
            for key in &keys {
                let opt = &disambiguation.options[*key];
                println!("   [{key}] {}", opt.label);
            }
            let Some(choice) = prompt_line("Enter your choice: ") else {
                println!("❌ Aborted.");
                return;
            };
            let Some(option) = disambiguation.options.get(choice.trim()) else {
                println!("❌ Invalid choice.");
                return;
            };
            request.approved_tool = Some(option.tool.clone());
            continue;
        }

        if let Some(confirmation) = &response.confirmation_request {
            if !auto_confirm {
                println!("\n{}", "=".repeat(60));
                println!("🚨 APPROVAL REQUIRED: {}", confirmation.tool);
                println!("⚠️  Risk: {:?}", confirmation.risk.level);
                println!("   Reason: {}", confirmation.risk.reason);
                if !confirmation.risk.impacts.is_empty() {
                    println!("\n   Impact:");
                    for impact in &confirmation.risk.impacts {
                        println!("   • {impact}");
                    }
                }
                println!("\n   Arguments:\n   {}", confirmation.arguments);
                println!("{}", "=".repeat(60));

                let Some(answer) = prompt_line("Do you want to proceed? [y/N]: ") else {
                    println!("❌ Action cancelled.");
                    return;
                };
                if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
                    println!("❌ Action cancelled.");
                    return;
                }
            }
            request.approved_tool = Some(confirmation.tool.clone());
            continue;
        }

        println!("{}", response.output);
        return;
    }
}

fn prompt_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    std::io::stdout().flush().ok()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok()?;
    Some(line)
}

/// Process-local wall-clock timestamp. A free function so the orchestrator
/// itself stays clock-agnostic (every other caller, including every test,
/// passes `now_ts` explicitly).
fn chrono_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Interactive REPL: one sticky session id for the process's lifetime so
/// follow-up queries ("describe it") can resolve via the session's
/// `last_backend`.
pub async fn run_repl(orchestrator: Arc<Orchestrator>) {
    let session_id = Uuid::new_v4();
    println!("devops-dispatcher — type a query, or 'exit' to quit.");
    loop {
        let Some(line) = prompt_line("> ") else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query, "exit" | "quit") {
            break;
        }
        run_turn(&orchestrator, session_id, query.to_string(), false, None).await;
    }
}
