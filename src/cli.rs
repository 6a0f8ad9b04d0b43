//! Interface de linha de comando do gradeflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (demo, run)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Gradeflow: tentativas de avaliação e revisão de entregas.
#[derive(Debug, Parser)]
#[command(name = "gradeflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: `gradeflow.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita logs detalhados (nível debug).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa a demonstração embutida com um cronômetro real.
    Demo {
        /// Limite de tempo da tentativa, em segundos.
        #[arg(long, default_value_t = 5)]
        time_limit: u64,
    },

    /// Reproduz um roteiro (TOML ou JSON) em tempo virtual.
    Run {
        /// Caminho para o arquivo do roteiro.
        #[arg(long)]
        file: PathBuf,
    },
}
