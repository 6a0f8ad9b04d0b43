//! Configuração do motor carregada a partir de `gradeflow.toml`.
//!
//! A struct [`EngineConfig`] contém as políticas configuráveis do fluxo.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! Variáveis de ambiente `GRADEFLOW_*` têm precedência sobre o arquivo.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::WorkflowError;

/// Arquivo procurado no diretório atual quando `--config` não é passado.
pub const DEFAULT_CONFIG_FILE: &str = "gradeflow.toml";

/// O que acontece quando o aluno envia a mesma atividade de novo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResubmissionPolicy {
    /// O primeiro envio é definitivo.
    #[default]
    FirstFinal,
    /// Substitui o envio anterior se ainda não foi avaliado e o prazo não passou.
    ReplaceBeforeDue,
}

impl FromStr for ResubmissionPolicy {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "first_final" => Ok(Self::FirstFinal),
            "replace_before_due" => Ok(Self::ReplaceBeforeDue),
            other => Err(WorkflowError::Config(format!(
                "unknown resubmission policy: {other}"
            ))),
        }
    }
}

/// Como respostas objetivas são comparadas com o gabarito.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMatching {
    /// Comparação byte a byte.
    #[default]
    Exact,
    /// Ignora espaços nas bordas e maiúsculas/minúsculas.
    CaseInsensitive,
}

impl FromStr for AnswerMatching {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "case_insensitive" => Ok(Self::CaseInsensitive),
            other => Err(WorkflowError::Config(format!(
                "unknown answer matching mode: {other}"
            ))),
        }
    }
}

/// Configuração de nível superior carregada de `gradeflow.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub resubmission: ResubmissionPolicy,

    #[serde(default)]
    pub answer_matching: AnswerMatching,

    /// Filtro do `tracing-subscriber` (sintaxe do `RUST_LOG`).
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

// Valor padrão do filtro de log: "info".
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resubmission: ResubmissionPolicy::default(),
            answer_matching: AnswerMatching::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl EngineConfig {
    /// Carrega a configuração de `path`, ou de `gradeflow.toml` no diretório
    /// atual. Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self, WorkflowError> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<EngineConfig>(&contents)?
        } else {
            Self::default()
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Aplica sobrescritas vindas de `lookup` (o ambiente, em produção).
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, WorkflowError> {
        if let Some(v) = lookup("GRADEFLOW_RESUBMISSION")
            && !v.is_empty()
        {
            self.resubmission = v.parse()?;
        }
        if let Some(v) = lookup("GRADEFLOW_ANSWER_MATCHING")
            && !v.is_empty()
        {
            self.answer_matching = v.parse()?;
        }
        if let Some(v) = lookup("GRADEFLOW_LOG")
            && !v.is_empty()
        {
            self.log_filter = v;
        }
        Ok(self)
    }
}
