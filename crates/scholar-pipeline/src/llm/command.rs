use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use scholar_core::LlmCommand;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{LlmClient, LlmError, LlmRequest, LlmResponse};

/// Código de salida que el comando usa para "reintentar más tarde"
/// (EX_TEMPFAIL).
const EXIT_TEMPFAIL: i32 = 75;

/// Cliente que delega en un comando externo: el prompt va por stdin y la
/// respuesta se lee de stdout. Variables de entorno expuestas al comando:
/// `SCHOLAR_STAGE`, `SCHOLAR_UNIT` y `SCHOLAR_EVALUATOR` (vacío para el
/// productor primario).
#[derive(Debug, Clone)]
pub struct CommandLlmClient {
    command: LlmCommand,
}

impl CommandLlmClient {
    pub fn new(command: LlmCommand) -> Self {
        Self { command }
    }

    async fn run(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut child = Command::new(&self.command.program).args(&self.command.args)
                                                           .env("SCHOLAR_STAGE", request.stage.as_str())
                                                           .env("SCHOLAR_UNIT", request.unit_id.as_deref().unwrap_or(""))
                                                           .env("SCHOLAR_EVALUATOR", request.evaluator.as_deref().unwrap_or(""))
                                                           .stdin(Stdio::piped())
                                                           .stdout(Stdio::piped())
                                                           .stderr(Stdio::piped())
                                                           .kill_on_drop(true)
                                                           .spawn()
                                                           .map_err(|e| LlmError::Unavailable(format!("{}: {e}", self.command.program)))?;
        // stdin se escribe mientras se drenan stdout y stderr: un prompt mayor
        // que el buffer del pipe no bloquea a un comando que responde en
        // streaming.
        let stdin = child.stdin.take();
        let prompt = request.prompt.as_bytes();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(prompt).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| LlmError::Unavailable(e.to_string()))?;
        match fed {
            // El comando puede responder sin leer todo el prompt.
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(LlmError::Unavailable(format!("stdin: {e}"))),
            _ => {}
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => {}
            Some(EXIT_TEMPFAIL) => return Err(LlmError::RateLimited(stderr)),
            Some(code) => return Err(LlmError::Rejected(format!("exit {code}: {stderr}"))),
            None => return Err(LlmError::Unavailable("terminated by signal".into())),
        }
        let text = String::from_utf8(output.stdout).map_err(|_| LlmError::Rejected("stdout is not UTF-8".into()))?;
        debug!("llm command {} answered {} bytes for {}", self.command.program, text.len(), request.key());
        Ok(LlmResponse { text,
                         finish_reason: None })
    }
}

#[async_trait]
impl LlmClient for CommandLlmClient {
    fn get_name(&self) -> &str {
        &self.command.program
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let limit = self.command.timeout_ms;
        match tokio::time::timeout(Duration::from_millis(limit), self.run(request)).await {
            Ok(r) => r,
            Err(_) => Err(LlmError::Timeout(limit)),
        }
    }
}
