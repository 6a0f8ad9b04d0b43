//! Interface de terminal do gradeflow: contagem regressiva e saída colorida.
//!
//! Usa `indicatif` para o spinner da tentativa em andamento e `console`
//! para colorir o resultado de cada operação.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use gradeflow::outcome::{Outcome, OutcomeCode};
use gradeflow::scenario::StepReport;

/// Spinner exibido enquanto uma tentativa cronometrada está aberta.
pub struct Countdown {
    pb: ProgressBar,
}

impl Countdown {
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(label.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { pb }
    }

    /// Atualiza o tempo restante mostrado ao lado do spinner.
    pub fn tick(&self, label: &str, seconds_left: u64) {
        self.pb.set_message(format!("{label}: {seconds_left}s restantes"));
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Verde quando a operação mudou estado, amarelo caso contrário.
fn code_style(code: OutcomeCode) -> Style {
    if code.changed_state() {
        Style::new().green().bold()
    } else {
        Style::new().yellow()
    }
}

pub fn print_outcome<T: Serialize>(label: &str, outcome: &Outcome<T>) {
    println!(
        "  {} {label} ({})",
        code_style(outcome.code).apply_to("●"),
        outcome.code
    );
}

pub fn print_error(label: &str, error: &dyn std::fmt::Display) {
    println!("  {} {label}: {error}", Style::new().red().bold().apply_to("✗"));
}

/// Imprime um registro em JSON formatado sob um título.
pub fn print_record<T: Serialize>(title: &str, record: &T) {
    println!();
    println!("{}", Style::new().cyan().apply_to(format!("─── {title} ───")));
    println!(
        "{}",
        serde_json::to_string_pretty(record).unwrap_or_default()
    );
}

/// Saída do `run`: um relatório por passo, em JSON, no stdout.
pub fn print_reports(reports: &[StepReport]) {
    println!(
        "{}",
        serde_json::to_string_pretty(reports).unwrap_or_default()
    );
}
