//! One-shot "say" command

use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use crate::cli::chat::{connect, ChatDriver, ChatOptions};
use crate::gateway::RemoteGateway;

pub async fn run_say(
    gateway: Arc<dyn RemoteGateway>,
    options: ChatOptions,
    prompt: String,
    conversation: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    if prompt.trim().is_empty() {
        eprintln!("Usage: iris say <prompt>");
        std::process::exit(1);
    }

    let (mut driver, mut events) = connect(gateway, options, io::stdout()).await?;
    say(&mut driver, &mut events, &prompt, conversation).await?;

    if driver.errored_sessions() > 0 {
        return Err("the reply stream failed".into());
    }
    driver.into_output().flush()?;
    Ok(())
}

async fn say<W: Write>(
    driver: &mut ChatDriver<W>,
    events: &mut tokio::sync::mpsc::UnboundedReceiver<crate::core::events::EngineEvent>,
    prompt: &str,
    conversation: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    let coordinator = driver.coordinator_mut();
    match conversation {
        Some(number) => {
            let index = number
                .checked_sub(1)
                .ok_or("conversation numbers start at 1")?;
            coordinator.select_conversation(index)?;
        }
        None => {
            let title = coordinator.settings().default_title.clone();
            coordinator.create_conversation(&title).await?;
        }
    }

    let session = driver.start_reply(prompt)?.ok_or("nothing to send")?;
    driver.wait_for_sessions(events).await?;
    tracing::debug!(state = %session.state(), "Reply complete");
    Ok(())
}
