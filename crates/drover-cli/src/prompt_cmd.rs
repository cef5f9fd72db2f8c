//! `drover prompt` command: one-shot question to an engine.

use anyhow::Result;

use drover_core::display::Display;

use crate::config::DroverConfig;
use crate::run_cmd::{EXIT_INTERRUPTED, cancel_on_interrupt, create_engine};

/// Send `text` once and print the answer.
///
/// With `stream`, progress is shown live and only the assistant's text is
/// printed at the end.
pub async fn run_prompt(config: &DroverConfig, text: &str, stream: bool) -> Result<i32> {
    let engine = create_engine(config)?;
    let cancel = cancel_on_interrupt();

    let answer = if stream {
        let display = Display::stdout();
        display.header(engine.name(), engine.config().model(), "prompt");
        let answer = engine.stream_prompt(&cancel, text, &display).await;
        display.stop_spinner();
        answer
    } else {
        engine.prompt(&cancel, text).await
    };

    match answer {
        Ok(answer) => {
            println!("{}", answer.trim_end());
            Ok(0)
        }
        Err(e) if e.is_cancelled() => {
            if let Some(partial) = e.partial_output().filter(|p| !p.trim().is_empty()) {
                println!("{}", partial.trim_end());
            }
            Ok(EXIT_INTERRUPTED)
        }
        Err(e) => Err(e.into()),
    }
}
