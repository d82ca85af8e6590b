use std::sync::{Arc, OnceLock};

use godot_config::{init_tracing, DebuggerConfig};
use parking_lot::Mutex;

pub type PanicNotifier = Arc<dyn Fn(&str) + Send + Sync + 'static>;

static NOTIFIERS: OnceLock<Mutex<Vec<PanicNotifier>>> = OnceLock::new();

/// Initialize structured logging and install a process-wide panic hook.
///
/// The hook records the panic through `tracing` and calls every registered
/// notifier. Calling this again only adds `notifier`.
pub fn init(config: &DebuggerConfig, notifier: PanicNotifier) {
    init_tracing(&config.logging);
    install_panic_hook(notifier);
}

pub fn install_panic_hook(notifier: PanicNotifier) {
    let notifiers = NOTIFIERS.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if cfg!(debug_assertions) {
                previous(info);
            }
            let message = panic_message(info);
            let location = info.location().map(|loc| loc.to_string());
            tracing::error!(
                target: "godot.dap.panic",
                panic_message = %message,
                panic_location = %location.as_deref().unwrap_or("<unknown>"),
                "panic captured"
            );

            let notification = format!("godot-dap hit an internal error: {message}");
            let notifiers = NOTIFIERS
                .get()
                .map(|n| n.lock().clone())
                .unwrap_or_default();
            for notify in notifiers {
                notify(&notification);
            }
        }));
        Mutex::new(Vec::new())
    });
    notifiers.lock().push(notifier);
}

fn panic_message(info: &std::panic::PanicHookInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "panic payload (non-string)".to_owned()
    }
}
