use std::ffi::{c_char, CStr, CString};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::installer::{spawn_install, PackageInstaller};
use crate::ir::LanguageMode;
use crate::pipeline::{build_translator, ConfigOverrides, MixedLanguageTranslator, TranslatorConfig};
use crate::progress::ConsoleProgress;
use crate::readiness::ReadinessHandle;

struct Runtime {
    translator: MixedLanguageTranslator,
    status: Arc<Mutex<String>>,
}

static RUNTIME: Lazy<Mutex<Option<Arc<Runtime>>>> = Lazy::new(|| Mutex::new(None));
static LAST_ERROR: Lazy<Mutex<Option<CString>>> = Lazy::new(|| Mutex::new(None));

fn set_last_error(msg: &str) {
    let c = to_cstring(msg);
    let mut guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    *guard = Some(c);
}

fn to_cstring(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

fn take_cstr(ptr: *const c_char, name: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Err(format!("{name} is null"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(|s| s.to_string())
        .map_err(|_| format!("{name} is not valid UTF-8"))
}

fn take_mode(ptr: *const c_char, name: &str) -> Result<LanguageMode, String> {
    if ptr.is_null() {
        return Ok(LanguageMode::Auto);
    }
    let s = take_cstr(ptr, name)?;
    s.parse::<LanguageMode>().map_err(|e| format!("{name}: {e}"))
}

fn runtime() -> Option<Arc<Runtime>> {
    RUNTIME
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
        .map(Arc::clone)
}

/// Loads `offline-translator.toml` (or the default search when `config_path` is null) and
/// starts model preparation in the background.
///
/// Returns 0 on success; non-zero on failure (see `ot_last_error_utf8()`).
#[no_mangle]
pub extern "C" fn ot_init(config_path: *const c_char) -> i32 {
    let cfg_path = if config_path.is_null() {
        None
    } else {
        match take_cstr(config_path, "config_path") {
            Ok(v) => Some(PathBuf::from(v)),
            Err(e) => {
                set_last_error(&e);
                return 2;
            }
        }
    };

    let cfg = match TranslatorConfig::from_path_and_args(cfg_path, ConfigOverrides::default()) {
        Ok(v) => v,
        Err(err) => {
            set_last_error(&format!("{err:#}"));
            return 10;
        }
    };

    let handle = ReadinessHandle::new();
    let translator = match build_translator(&cfg, handle.view(), ConsoleProgress::quiet()) {
        Ok(v) => v,
        Err(err) => {
            set_last_error(&format!("{err:#}"));
            return 11;
        }
    };

    let status = Arc::new(Mutex::new("初始化中...".to_string()));
    let sink = Arc::clone(&status);
    let installer = Arc::new(PackageInstaller::from_config(&cfg));
    if let Err(err) = spawn_install(installer, handle, move |msg: &str| {
        *sink.lock().unwrap_or_else(|e| e.into_inner()) = msg.to_string();
    }) {
        set_last_error(&format!("{err:#}"));
        return 12;
    }

    let mut guard = RUNTIME.lock().unwrap_or_else(|e| e.into_inner());
    *guard = Some(Arc::new(Runtime { translator, status }));
    0
}

/// 1 when models are ready, 0 otherwise (including before `ot_init`).
#[no_mangle]
pub extern "C" fn ot_is_ready() -> i32 {
    match runtime() {
        Some(rt) if rt.translator.is_ready() => 1,
        _ => 0,
    }
}

/// Latest model preparation message. Free with `ot_string_free`.
#[no_mangle]
pub extern "C" fn ot_status_utf8() -> *mut c_char {
    let msg = match runtime() {
        Some(rt) => rt.status.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        None => "未初始化".to_string(),
    };
    to_cstring(&msg).into_raw()
}

/// Translates `text`; `from`/`to` are "auto", "zh" or "en" (null means "auto").
///
/// Returns a string to free with `ot_string_free`, or null on invalid arguments or before
/// `ot_init` (see `ot_last_error_utf8()`).
#[no_mangle]
pub extern "C" fn ot_translate(
    text: *const c_char,
    from: *const c_char,
    to: *const c_char,
) -> *mut c_char {
    let args = take_cstr(text, "text").and_then(|t| {
        let src = take_mode(from, "from")?;
        let tgt = take_mode(to, "to")?;
        Ok((t, src, tgt))
    });
    let (text, src, tgt) = match args {
        Ok(v) => v,
        Err(e) => {
            set_last_error(&e);
            return std::ptr::null_mut();
        }
    };
    let Some(rt) = runtime() else {
        set_last_error("ot_init has not been called");
        return std::ptr::null_mut();
    };
    to_cstring(&rt.translator.translate(&text, src, tgt)).into_raw()
}

/// Releases a string returned by this library.
#[no_mangle]
pub extern "C" fn ot_string_free(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(ptr) });
}

/// Returns the last error message as a UTF-8 C string pointer (or null if none).
/// The pointer stays valid until the next failing call.
#[no_mangle]
pub extern "C" fn ot_last_error_utf8() -> *const c_char {
    let guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    match guard.as_ref() {
        Some(s) => s.as_ptr(),
        None => std::ptr::null(),
    }
}
