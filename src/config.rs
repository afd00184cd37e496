use std::{
    env::{self, VarError},
    fmt::Display,
    str::FromStr,
    time::Duration,
};

use rearch::{CData, CapsuleHandle, Container};
use sea_orm::{ConnectOptions, Database, DbConn};
use tracing::{info, instrument, warn};

use crate::{slug::SlugAllocator, url_service::ShortenerSettings};

/// # Errors
/// Will return [`Err`] if the connection to the database fails.
#[instrument]
pub async fn init_container() -> anyhow::Result<Container> {
    info!("Initializing container");
    let container = Container::new();

    let (db_connection_options, set_db_conn) =
        container.read((db_connection_options_capsule, db_conn_init_action));

    info!(?db_connection_options, "Connecting to database");
    set_db_conn(Database::connect(db_connection_options).await?);

    info!("Container initialized");
    Ok(container)
}

/// # Panics
/// Panics when environment variable is not set or is invalid.
#[must_use]
pub fn db_connection_options_capsule(_: CapsuleHandle) -> ConnectOptions {
    const ENV_VAR_NAME: &str = "DB_URL";
    required_env_var(ENV_VAR_NAME).into()
}

fn db_conn_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<DbConn>, impl use<> + CData + Fn(Option<DbConn>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn db_conn_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(DbConn) {
    let set_db_conn = get.as_ref(db_conn_manager).1.clone();
    move |db| set_db_conn(Some(db))
}

/// # Panics
/// Panics when the [`DbConn`] was not set via [`db_conn_init_action`].
pub fn db_conn_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> DbConn {
    let db_conn = get.as_ref(db_conn_manager).0.clone();
    db_conn.expect("DbConn should've been set via db_conn_init_action!")
}

/// # Panics
/// Panics when environment variable is not set or is not a valid port.
pub fn port_capsule(_: CapsuleHandle) -> u16 {
    const ENV_VAR_NAME: &str = "PORT";
    let port = required_env_var(ENV_VAR_NAME);
    port.parse()
        .unwrap_or_else(|err| panic!("{ENV_VAR_NAME} is not a valid port ({port}): {err}"))
}

pub fn addr_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> String {
    format!("0.0.0.0:{}", get.as_ref(port_capsule))
}

/// Public host prefixed to every short URL.
///
/// # Panics
/// Panics when environment variable is invalid.
pub fn url_host_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> String {
    const ENV_VAR_NAME: &str = "URL_HOST";

    match env::var(ENV_VAR_NAME) {
        Ok(host) => {
            info!(host, "{ENV_VAR_NAME} environment variable set");
            host
        }
        Err(VarError::NotPresent) => {
            let default_host = format!("http://localhost:{}", get.as_ref(port_capsule));
            warn!(
                host = %default_host,
                "{ENV_VAR_NAME} environment variable not set; defaulting to {default_host}"
            );
            default_host
        }
        Err(VarError::NotUnicode(actual)) => {
            panic!(
                "{ENV_VAR_NAME} environment variable is invalid: {}",
                actual.display()
            );
        }
    }
}

/// # Panics
/// Panics when any of the slug environment variables is invalid.
pub fn shortener_settings_capsule(_: CapsuleHandle) -> ShortenerSettings {
    let defaults = ShortenerSettings::default();
    let allocator = SlugAllocator {
        alphabet: env_var_or("SLUG_ALPHABET", defaults.allocator.alphabet),
        length: env_var_or("SLUG_LENGTH", defaults.allocator.length),
        max_attempts: env_var_or("SLUG_MAX_ATTEMPTS", defaults.allocator.max_attempts),
        grow_after: optional_env_var("SLUG_GROW_AFTER"),
    };
    assert!(allocator.length > 0, "SLUG_LENGTH must be at least 1");

    let default_deadline_ms = u64::try_from(defaults.deadline.as_millis()).unwrap_or(u64::MAX);
    ShortenerSettings {
        allocator,
        insert_attempts: env_var_or("INSERT_ATTEMPTS", defaults.insert_attempts),
        deadline: Duration::from_millis(env_var_or("REQUEST_DEADLINE_MS", default_deadline_ms)),
    }
}

fn required_env_var(name: &str) -> String {
    env::var(name).unwrap_or_else(|err| match err {
        VarError::NotPresent => panic!("{name} is not set"),
        VarError::NotUnicode(actual) => {
            panic!("{name} is invalid unicode: {}", actual.display());
        }
    })
}

fn optional_env_var<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => {
            info!(raw, "{name} environment variable set");
            Some(
                raw.parse()
                    .unwrap_or_else(|err| panic!("{name} environment variable is invalid: {err}")),
            )
        }
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(actual)) => {
            panic!("{name} environment variable is invalid: {}", actual.display());
        }
    }
}

fn env_var_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    optional_env_var(name).unwrap_or_else(|| {
        info!("{name} environment variable not set; defaulting to {default}");
        default
    })
}
