use serde::{Deserialize, Serialize};

/// Round a money amount to 2 decimals.
///
/// Every balance write goes through this; comparisons against balances must
/// happen after the same rounding so persisted and compared values agree.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Directional bias attached to a script day.
///
/// The names are opaque tags fixed by catalogue data; the generator only maps
/// them to a strength coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    StrongUp,
    Up,
    Flat,
    Down,
    StrongDown,
    NoEffect,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::StrongUp => "STRONG_UP",
            Trend::Up => "UP",
            Trend::Flat => "FLAT",
            Trend::Down => "DOWN",
            Trend::StrongDown => "STRONG_DOWN",
            Trend::NoEffect => "NO_EFFECT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "STRONG_UP" => Some(Trend::StrongUp),
            "UP" => Some(Trend::Up),
            "FLAT" => Some(Trend::Flat),
            "DOWN" => Some(Trend::Down),
            "STRONG_DOWN" => Some(Trend::StrongDown),
            "NO_EFFECT" => Some(Trend::NoEffect),
            _ => None,
        }
    }

    /// Coefficient applied to the daily target change.
    pub fn strength(&self) -> f64 {
        match self {
            Trend::StrongUp => 1.0,
            Trend::Up => 0.5,
            Trend::Flat => 0.0,
            Trend::Down => -0.5,
            Trend::StrongDown => -1.0,
            Trend::NoEffect => 0.0,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub production: bool,
    pub cors_origin: Option<String>,
    pub jwt_secret: String,
    pub admin_secret: String,
    /// Whether borrow/repay require a running game.
    pub loan_requires_running: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "./bullrush.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .unwrap_or(8000);

        let production = std::env::var("NODE_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);

        let cors_origin = std::env::var("CORS_ORIGIN").ok().filter(|v| !v.is_empty());

        let jwt_secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-in-production-minimum-32-characters".to_string());

        let admin_secret =
            std::env::var("ADMIN_SECRET").unwrap_or_else(|_| "admin-secret".to_string());

        let loan_requires_running = std::env::var("LOAN_REQUIRES_RUNNING")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(true);

        Ok(Self {
            database_path,
            port,
            production,
            cors_origin,
            jwt_secret,
            admin_secret,
            loan_requires_running,
        })
    }

    /// Bind address: production exposes the service, dev stays on loopback.
    pub fn bind_addr(&self) -> String {
        if self.production {
            format!("0.0.0.0:{}", self.port)
        } else {
            format!("127.0.0.1:{}", self.port)
        }
    }
}
