//! Logging macros emitting into the session's event stream.

macro_rules! info {
    ($session:expr, $msg:expr) => {
        info!($session, $msg,)
    };
    ($session:expr, $msg:expr, $($args:expr),* $(,)?) => {
        $session.emit_event($crate::events::Event::Info(format!($msg, $($args),*)))
    };
}

macro_rules! warning {
    ($session:expr, $msg:expr) => {
        warning!($session, $msg,)
    };
    ($session:expr, $msg:expr, $($args:expr),* $(,)?) => {
        $session.emit_event($crate::events::Event::Warning(format!($msg, $($args),*)))
    };
}

macro_rules! error {
    ($session:expr, $msg:expr) => {
        error!($session, $msg,)
    };
    ($session:expr, $msg:expr, $($args:expr),* $(,)?) => {
        $session.emit_event($crate::events::Event::Error(format!($msg, $($args),*)))
    };
}
