use crate::core::config::data::Config;

fn show<T: std::fmt::Display>(key: &str, value: Option<T>, effective: impl std::fmt::Display) {
    match value {
        Some(value) => println!("  {key}: {value}"),
        None => println!("  {key}: (unset, using {effective})"),
    }
}

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        show("base-url", self.base_url.as_deref(), self.base_url());
        show(
            "reveal-interval-ms",
            self.reveal_interval_ms,
            self.reveal_interval().as_millis(),
        );
        show("context", self.context.as_deref(), self.context());
        show("default-title", self.default_title.as_deref(), self.default_title());
        show("greeting", self.greeting.as_deref(), self.greeting());
        show(
            "request-timeout-secs",
            self.request_timeout_secs,
            self.request_timeout().as_secs(),
        );
    }
}
