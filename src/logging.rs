//! Arranque del logger de proceso.
//! Todos los crates del workspace loguean vía la fachada `log`; este módulo
//! sólo instala `env_logger` (nivel desde `RUST_LOG`, por defecto `info`).

/// Idempotente: una segunda llamada no hace nada.
pub fn init() { init_with_default("info"); }

pub fn init_with_default(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    if env_logger::Builder::from_env(env).format_timestamp_millis().try_init().is_err() {
        log::debug!("logger already initialised");
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_twice_is_harmless() {
        super::init();
        super::init_with_default("debug");
        log::info!("logger ready");
    }
}
