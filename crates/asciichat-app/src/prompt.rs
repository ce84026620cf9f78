use std::io::{self, BufRead, Write};
use std::net::SocketAddr;

use asciichat_transport::ConsentPrompt;
use async_trait::async_trait;
use tracing::warn;

/// Asks on the terminal: `Accept call? (y/n)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

#[async_trait]
impl ConsentPrompt for StdinPrompt {
    async fn decide(&self, caller: SocketAddr) -> bool {
        let asked = tokio::task::spawn_blocking(move || {
            let mut out = io::stdout().lock();
            write!(out, "Incoming call from {}. Accept call? (y/n): ", caller.ip())?;
            out.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok::<_, io::Error>(line)
        })
        .await;

        match asked {
            Ok(Ok(line)) => is_yes(&line),
            Ok(Err(e)) => {
                warn!("Could not read an answer, declining: {}", e);
                false
            }
            Err(e) => {
                warn!("Prompt task failed, declining: {}", e);
                false
            }
        }
    }
}

/// Only an explicit yes accepts. EOF and anything else decline.
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes("  Y "));
        assert!(is_yes("yes\r\n"));
        assert!(!is_yes("n\n"));
        assert!(!is_yes(""));
        assert!(!is_yes("yep"));
    }
}
