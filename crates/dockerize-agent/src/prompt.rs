//! Line-oriented operator prompt shared by the secret collector and the
//! escalation gateway.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

type Reader = Box<dyn AsyncBufRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Asks one question at a time. Concurrent callers are serialised so
/// questions and answers never interleave.
pub struct Prompter {
    io: Mutex<(Reader, Writer)>,
}

impl Prompter {
    pub fn new(
        input: impl AsyncBufRead + Send + Unpin + 'static,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            io: Mutex::new((Box::new(input), Box::new(output))),
        }
    }

    /// Reads from stdin and writes prompts to stderr, leaving stdout for
    /// machine-readable output.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr())
    }

    /// Print `text` without waiting for an answer.
    pub async fn say(&self, text: &str) -> io::Result<()> {
        let mut guard = self.io.lock().await;
        let (_, output) = &mut *guard;
        output.write_all(text.as_bytes()).await?;
        if !text.ends_with('\n') {
            output.write_all(b"\n").await?;
        }
        output.flush().await
    }

    /// Print `question` and read one line. `None` at end of input.
    pub async fn ask(&self, question: &str) -> io::Result<Option<String>> {
        let mut guard = self.io.lock().await;
        let (input, output) = &mut *guard;
        output.write_all(question.as_bytes()).await?;
        output.flush().await?;

        let mut line = String::new();
        if input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}
