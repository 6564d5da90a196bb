//! Configuração do tiered carregada a partir de `tiered.toml`.
//!
//! A struct [`TieredConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `TIERED_LOGS_DIR` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Configuração de nível superior carregada de `tiered.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct TieredConfig {
    /// Arquivo do ledger de tarefas concluídas.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Diretório dos logs (erros, transcrições, checklist).
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub relay: RelaySection,

    #[serde(default)]
    pub elevation: ElevationSection,

    #[serde(default)]
    pub protection: ProtectionSection,

    #[serde(default)]
    pub driver: DriverSection,

    #[serde(default)]
    pub registry: RegistrySection,

    #[serde(default)]
    pub requirements: RequirementsSection,
}

/// Limites do executor de ações.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    /// Máximo de tentativas por ação.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Espera fixa entre tentativas, em milissegundos.
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

/// Parâmetros da região de memória compartilhada e do polling.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_region_size")]
    pub region_size: usize,

    #[serde(default = "default_handshake_initial_ms")]
    pub handshake_initial_ms: u64,

    #[serde(default = "default_handshake_step_ms")]
    pub handshake_step_ms: u64,

    #[serde(default = "default_handshake_limit_ms")]
    pub handshake_limit_ms: u64,

    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
}

/// Como relançar o executável em contextos elevados.
#[derive(Debug, Clone, Deserialize)]
pub struct ElevationSection {
    /// Prefixo de comando que inicia um programa como TrustedInstaller.
    #[serde(default = "default_trusted_installer_launcher")]
    pub trusted_installer_launcher: Vec<String>,

    /// Prefixo de comando para uma instância elevada de Administrador.
    #[serde(default)]
    pub elevated_launcher: Vec<String>,

    #[serde(default = "default_child_timeout_secs")]
    pub child_timeout_secs: u64,

    /// Timeout do caminho simples (motor já encerrado).
    #[serde(default = "default_simple_child_timeout_secs")]
    pub simple_child_timeout_secs: u64,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_resettle_ms")]
    pub resettle_ms: u64,
}

/// Serviço de proteção (antivírus) que precisa ser desativado.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtectionSection {
    #[serde(default = "default_engine_process")]
    pub engine_process: String,

    #[serde(default)]
    pub disable_command: Option<String>,

    /// Comando cujo código de saída 0 indica que os toggles estão desligados.
    #[serde(default)]
    pub toggles_probe: Option<String>,

    /// Comando cujo código de saída 0 indica que só restam resíduos.
    #[serde(default)]
    pub remnants_probe: Option<String>,

    #[serde(default = "default_toggle_poll_ms")]
    pub toggle_poll_ms: u64,

    #[serde(default = "default_toggle_wait_secs")]
    pub toggle_wait_secs: u64,

    #[serde(default = "default_reboot_command")]
    pub reboot_command: String,
}

/// Driver auxiliar de modo kernel instalado durante a execução.
#[derive(Debug, Clone, Deserialize)]
pub struct DriverSection {
    #[serde(default = "default_driver_service")]
    pub service_name: String,

    /// Comando cujo código de saída 0 indica que o serviço existe.
    /// Sem ele, usa `sc query <service_name>` no Windows.
    #[serde(default)]
    pub query_command: Option<String>,

    #[serde(default)]
    pub install_command: Option<String>,

    #[serde(default)]
    pub uninstall_command: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrySection {
    /// Hives de usuário descarregados ao final da execução.
    #[serde(default)]
    pub user_hives: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequirementsSection {
    #[serde(default = "default_internet_probe_url")]
    pub internet_probe_url: String,

    #[serde(default = "default_internet_timeout_secs")]
    pub internet_timeout_secs: u64,
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("TasksAdded.txt")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("Logs")
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    50
}

fn default_region_size() -> usize {
    5_000_000
}

fn default_handshake_initial_ms() -> u64 {
    20
}

fn default_handshake_step_ms() -> u64 {
    200
}

fn default_handshake_limit_ms() -> u64 {
    3500
}

fn default_drain_interval_ms() -> u64 {
    20
}

fn default_trusted_installer_launcher() -> Vec<String> {
    ["NSudoLC.exe", "-U:T", "-P:E", "-Wait", "-ShowWindowMode:Hide"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_child_timeout_secs() -> u64 {
    10
}

fn default_simple_child_timeout_secs() -> u64 {
    15
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_resettle_ms() -> u64 {
    3000
}

fn default_engine_process() -> String {
    "MsMpEng.exe".to_string()
}

fn default_toggle_poll_ms() -> u64 {
    500
}

fn default_toggle_wait_secs() -> u64 {
    300
}

fn default_reboot_command() -> String {
    "timeout /t 1 & shutdown /r /t 0".to_string()
}

fn default_driver_service() -> String {
    "KProcessHacker2".to_string()
}

fn default_internet_probe_url() -> String {
    "http://www.msftconnecttest.com/connecttest.txt".to_string()
}

fn default_internet_timeout_secs() -> u64 {
    5
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            region_size: default_region_size(),
            handshake_initial_ms: default_handshake_initial_ms(),
            handshake_step_ms: default_handshake_step_ms(),
            handshake_limit_ms: default_handshake_limit_ms(),
            drain_interval_ms: default_drain_interval_ms(),
        }
    }
}

impl Default for ElevationSection {
    fn default() -> Self {
        Self {
            trusted_installer_launcher: default_trusted_installer_launcher(),
            elevated_launcher: Vec::new(),
            child_timeout_secs: default_child_timeout_secs(),
            simple_child_timeout_secs: default_simple_child_timeout_secs(),
            settle_ms: default_settle_ms(),
            resettle_ms: default_resettle_ms(),
        }
    }
}

impl Default for ProtectionSection {
    fn default() -> Self {
        Self {
            engine_process: default_engine_process(),
            disable_command: None,
            toggles_probe: None,
            remnants_probe: None,
            toggle_poll_ms: default_toggle_poll_ms(),
            toggle_wait_secs: default_toggle_wait_secs(),
            reboot_command: default_reboot_command(),
        }
    }
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            service_name: default_driver_service(),
            query_command: None,
            install_command: None,
            uninstall_command: None,
        }
    }
}

impl Default for RequirementsSection {
    fn default() -> Self {
        Self {
            internet_probe_url: default_internet_probe_url(),
            internet_timeout_secs: default_internet_timeout_secs(),
        }
    }
}

impl Default for TieredConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            logs_dir: default_logs_dir(),
            retry: RetrySection::default(),
            relay: RelaySection::default(),
            elevation: ElevationSection::default(),
            protection: ProtectionSection::default(),
            driver: DriverSection::default(),
            registry: RegistrySection::default(),
            requirements: RequirementsSection::default(),
        }
    }
}

impl TieredConfig {
    /// Carrega a configuração do caminho fornecido ou de `tiered.toml` no
    /// diretório atual. Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(Path::new("tiered.toml"));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<TieredConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(dir) = std::env::var("TIERED_LOGS_DIR") {
            if !dir.is_empty() {
                config.logs_dir = PathBuf::from(dir);
            }
        }

        Ok(config)
    }
}

impl RelaySection {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

impl ElevationSection {
    pub fn child_timeout(&self) -> Duration {
        Duration::from_secs(self.child_timeout_secs)
    }

    pub fn simple_child_timeout(&self) -> Duration {
        Duration::from_secs(self.simple_child_timeout_secs)
    }
}
