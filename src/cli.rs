//! Interface de linha de comando do tiered baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, status,
//! disable-protection) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::scheduler::Privilege;

/// tiered: executor de playbooks do Windows em níveis de privilégio.
#[derive(Debug, Parser)]
#[command(name = "tiered", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: tiered.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa o playbook do diretório fornecido.
    Run {
        /// Diretório do playbook.
        playbook: PathBuf,

        /// Mantém o ledger de uma execução interrompida.
        #[arg(long, default_value_t = false)]
        resume: bool,

        /// Região de memória compartilhada para a saída (processo filho).
        #[arg(long, hide = true)]
        relay: Option<String>,

        /// Sessão de privilégio informada pelo processo pai (padrão: admin).
        #[arg(long, hide = true, value_enum)]
        session: Option<Privilege>,
    },

    /// Lista as tarefas do playbook, o peso total e o que já foi concluído.
    Status {
        /// Diretório do playbook.
        playbook: PathBuf,
    },

    /// Desativa a proteção antivírus e sai com 0 ou 1.
    #[command(hide = true)]
    DisableProtection,
}
