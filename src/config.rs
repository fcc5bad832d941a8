use std::path::PathBuf;
use std::time::Duration;

#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Clone, Debug)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum)]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "5000")]
    pub port: u16,

    // this should be either * for allowing everything, or a comma seperated list of domains like
    // example.com,something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,

    // path the playlist rewriter points segments and keys at, it has to match the route the proxy
    // is mounted on
    #[clap(long, env, default_value = "/proxy")]
    pub proxy_path: String,

    // one ua for everything so the scrapers, the proxy and the browser all look like the same
    // person
    #[clap(
        long,
        env,
        default_value = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
    )]
    pub user_agent: String,

    #[clap(long, env, default_value = "20")]
    pub request_timeout_secs: u64,

    // suggestions are typed live so they get a much shorter leash than a full search
    #[clap(long, env, default_value = "2500")]
    pub suggestions_timeout_ms: u64,

    #[clap(long, env, default_value = "https://dooplay.example")]
    pub dooplay_base_url: String,

    #[clap(long, env, default_value = "https://zoro.example")]
    pub zoro_base_url: String,

    // embed hosts that fight back and need the full browser, comma seperated host suffixes
    #[clap(
        long,
        env,
        default_value = "vidsrc.to,vidsrc.me,embedsu.com,megacloud.tv,streamwish.to,filemoon.sx"
    )]
    pub hostile_hosts: String,

    // if not set the usual chrome/chromium install locations are searched
    #[clap(long, env)]
    pub chrome_executable: Option<PathBuf>,

    #[clap(long, env, default_value = "true", action = clap::ArgAction::Set)]
    pub headless: bool,

    // how long we wait for the network capture once the page has been poked
    #[clap(long, env, default_value = "12")]
    pub interaction_window_secs: u64,
}

impl AppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn suggestions_timeout(&self) -> Duration {
        Duration::from_millis(self.suggestions_timeout_ms)
    }

    pub fn interaction_window(&self) -> Duration {
        Duration::from_secs(self.interaction_window_secs)
    }

    pub fn hostile_host_list(&self) -> Vec<String> {
        self.hostile_hosts
            .split(',')
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect()
    }
}

impl Default for AppConfig {
    // defaults aren't really needed here but it's here as a bad fallback and for tests
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 5000,
            cors_origin: "*".to_string(),
            sentry_dsn: None,
            proxy_path: "/proxy".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            request_timeout_secs: 20,
            suggestions_timeout_ms: 2500,
            dooplay_base_url: "https://dooplay.example".to_string(),
            zoro_base_url: "https://zoro.example".to_string(),
            hostile_hosts: "vidsrc.to,vidsrc.me,embedsu.com,megacloud.tv,streamwish.to,filemoon.sx"
                .to_string(),
            chrome_executable: None,
            headless: true,
            interaction_window_secs: 12,
        }
    }
}
