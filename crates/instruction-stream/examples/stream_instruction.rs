use instruction_stream::observability::{LogSettings, init_observability};
use instruction_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), StreamError> {
    let _ = dotenvy::dotenv();
    let _log_guard = init_observability(&LogSettings::from_env())?;

    let mut args = std::env::args().skip(1);
    let (Some(session_id), Some(instruction)) = (args.next(), args.next()) else {
        eprintln!("usage: stream_instruction <session-id> <instruction>");
        std::process::exit(2);
    };

    let controller = StreamController::http(ClientConfig::from_env()?)?;
    let mut updates = controller.subscribe();
    let task = controller.spawn_streaming(session_id, instruction);

    let mut printed = 0;
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        let text = &snapshot.state.streamed_text;
        if text.len() > printed {
            print!("{}", &text[printed..]);
            printed = text.len();
        }
        if !snapshot.state.is_loading {
            break;
        }
    }
    println!();

    match task.wait().await {
        StreamOutcome::Completed => {
            for turn in controller.snapshot().turns {
                match turn {
                    Turn::Tool { name, status, .. } => eprintln!(
                        "tool {} -> {}",
                        name.as_deref().unwrap_or("<unnamed>"),
                        status.as_str()
                    ),
                    Turn::Instruction { content, .. } => eprintln!("instruction: {content}"),
                    _ => {}
                }
            }
        }
        StreamOutcome::Cancelled => eprintln!("stream cancelled"),
        StreamOutcome::Failed(message) => eprintln!("stream failed: {message}"),
    }
    Ok(())
}
