//! Terminal implementations of the prompt and render seams.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use mconnect_core::{ConfirmationPrompt, DeviceView, Prompt, PromptResponse, Render};
use mconnect_types::DeviceId;

/// Asks on stdin. With `assume_yes` every prompt is accepted unseen.
pub struct TerminalPrompt {
    pub assume_yes: bool,
}

#[async_trait]
impl ConfirmationPrompt for TerminalPrompt {
    async fn confirm(&self, prompt: &Prompt) -> PromptResponse {
        if self.assume_yes {
            return PromptResponse::Accept;
        }

        let text = format!("{}\n{}\n[y/N] ", prompt.title, prompt.message);
        let answer = tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
            let mut stdout = io::stdout();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
            let mut line = String::new();
            let read = io::stdin().lock().read_line(&mut line)?;
            Ok((read > 0).then_some(line))
        })
        .await;

        match answer {
            Ok(Ok(Some(line))) => parse_answer(&line),
            // EOF, I/O error or a cancelled read: nobody answered.
            _ => PromptResponse::Dismissed,
        }
    }
}

fn parse_answer(line: &str) -> PromptResponse {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => PromptResponse::Accept,
        _ => PromptResponse::Reject,
    }
}

/// Prints one line per redraw.
pub struct LineRenderer {
    pub id: DeviceId,
}

impl Render for LineRenderer {
    fn render(&mut self, view: &DeviceView) {
        println!("{}", format_view(&self.id, view));
    }

    fn dispose(&mut self) {
        println!("  {} gone", self.id);
    }
}

pub fn format_view(id: &DeviceId, view: &DeviceView) -> String {
    let battery = if view.battery_label.is_empty() {
        "-".to_string()
    } else {
        view.battery_label.clone()
    };
    let shown = if !view.visible {
        "hidden"
    } else if view.offline_collapsed {
        "offline"
    } else {
        "shown"
    };
    format!(
        "  {:<24} {:<28} {:<26} battery {:<5} {}  [{}]",
        view.label, view.indicator_icon, view.status_icon, battery, shown, id
    )
}
