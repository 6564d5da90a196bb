//! Saída de console do tiered: marcadores estáveis, cores e progresso.
//!
//! Usa `console` para estilizar os marcadores e `indicatif` para a barra de
//! progresso por peso de ações. O [`Console`] escreve em stdout, na região
//! de memória compartilhada (processo filho elevado) ou em memória (testes),
//! e opcionalmente replica cada linha num arquivo de transcrição.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressStyle};

use crate::relay::RelayWriter;

/// Erro fatal: o supervisor deve parar.
pub const FATAL_PREFIX: &str = ":TIERED-FATAL: ";
/// Uma ação esgotou suas tentativas: o supervisor continua.
pub const ERROR_PREFIX: &str = ":TIERED-ERROR: ";
/// Anúncio de fase.
pub const STATUS_PREFIX: &str = ":TIERED-STATUS: ";
/// Linha emitida uma única vez por ação com o seu peso de progresso.
pub const WEIGHT_PREFIX: &str = "Action completed. Weight:";

// Destino das linhas.
enum Sink {
    Stdout,
    Relay(Mutex<RelayWriter>),
    #[cfg(test)]
    Capture(Mutex<Vec<String>>),
}

/// Console de uma execução.
pub struct Console {
    sink: Sink,
    // Cópia de cada linha (AdminOutput.txt / TIOutput.txt).
    transcript: Option<Mutex<File>>,
    // Barra de progresso, apenas em terminal interativo.
    progress: OnceLock<ProgressBar>,
    green: Style,
    red: Style,
    yellow: Style,
    cyan: Style,
}

impl Console {
    fn with_sink(sink: Sink) -> Self {
        Self {
            sink,
            transcript: None,
            progress: OnceLock::new(),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            cyan: Style::new().cyan(),
        }
    }

    /// Console do processo principal.
    pub fn stdout() -> Self {
        Self::with_sink(Sink::Stdout)
    }

    /// Console do processo filho: as linhas vão para a região compartilhada.
    pub fn relay(writer: RelayWriter) -> Self {
        Self::with_sink(Sink::Relay(Mutex::new(writer)))
    }

    /// Console em memória para testes.
    #[cfg(test)]
    pub fn capture() -> Self {
        Self::with_sink(Sink::Capture(Mutex::new(Vec::new())))
    }

    /// Replica cada linha no arquivo indicado (modo append).
    ///
    /// Se o arquivo não puder ser aberto, o console segue sem transcrição.
    pub fn with_transcript(mut self, path: &Path) -> Self {
        match open_transcript(path) {
            Ok(file) => self.transcript = Some(Mutex::new(file)),
            Err(e) => tracing::warn!("transcript {} unavailable: {e}", path.display()),
        }
        self
    }

    /// Inicia a barra de progresso com o peso total das ações.
    ///
    /// Só tem efeito no console de stdout conectado a um terminal.
    pub fn start_progress(&self, total: u64) {
        if !matches!(self.sink, Sink::Stdout) || !Term::stdout().is_term() || total == 0 {
            return;
        }
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar().template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
            pb.set_style(style);
        }
        let _ = self.progress.set(pb);
    }

    pub fn finish_progress(&self) {
        if let Some(pb) = self.progress.get() {
            pb.finish_and_clear();
        }
    }

    /// Escreve uma linha sem estilo.
    pub fn line(&self, text: &str) {
        if let Some(weight) = parse_weight(text) {
            if let Some(pb) = self.progress.get() {
                pb.inc(weight);
            }
        }
        self.emit(None, text);
    }

    pub fn status(&self, text: &str) {
        self.emit(Some((STATUS_PREFIX, &self.cyan)), text);
    }

    /// Marcador de ação esgotada.
    pub fn action_error(&self, text: &str) {
        self.emit(Some((ERROR_PREFIX, &self.yellow)), text);
    }

    /// Marcador de erro fatal.
    pub fn fatal(&self, text: &str) {
        self.emit(Some((FATAL_PREFIX, &self.red)), text);
    }

    /// Mensagem final de sucesso, em verde no terminal.
    pub fn success(&self, text: &str) {
        self.finish_progress();
        match &self.sink {
            Sink::Stdout => {
                println!("{}", self.green.apply_to(text));
                self.transcribe(text);
            }
            _ => self.emit(None, text),
        }
    }

    /// Linhas capturadas (apenas testes).
    #[cfg(test)]
    pub fn captured(&self) -> Vec<String> {
        match &self.sink {
            Sink::Capture(lines) => lines.lock().map(|l| l.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn emit(&self, marker: Option<(&str, &Style)>, text: &str) {
        let plain = match marker {
            Some((prefix, _)) => format!("{prefix}{text}"),
            None => text.to_string(),
        };

        match &self.sink {
            Sink::Stdout => {
                let styled = match marker {
                    Some((prefix, style)) => format!("{}{text}", style.apply_to(prefix)),
                    None => plain.clone(),
                };
                match self.progress.get() {
                    Some(pb) => pb.println(styled),
                    None => println!("{styled}"),
                }
            }
            Sink::Relay(writer) => {
                if let Ok(mut writer) = writer.lock() {
                    if let Err(e) = writeln!(writer, "{plain}") {
                        tracing::warn!("relay write failed: {e}");
                    }
                }
            }
            #[cfg(test)]
            Sink::Capture(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(plain.clone());
                }
            }
        }

        self.transcribe(&plain);
    }

    fn transcribe(&self, text: &str) {
        if let Some(file) = &self.transcript {
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{text}");
            }
        }
    }
}

fn open_transcript(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Extrai o peso de uma linha `Action completed. Weight:N`.
pub fn parse_weight(line: &str) -> Option<u64> {
    line.strip_prefix(WEIGHT_PREFIX)
        .and_then(|w| w.trim().parse::<u64>().ok())
}
