//! FFI bindings for loopwatch
//!
//! This module provides C-compatible functions for calling loopwatch from other languages.
//! All functions use C strings (null-terminated) and return allocated memory that
//! must be freed by the caller using `loopwatch_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::pipeline::DeathLoopEngine;
use crate::schema::UsageRowAdapter;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Build an engine from an optional config string; NULL means defaults
unsafe fn engine_from(config_json: *const c_char) -> Result<DeathLoopEngine, EngineError> {
    let config = if config_json.is_null() {
        EngineConfig::default()
    } else {
        let json = cstr_to_string(config_json)
            .ok_or_else(|| EngineError::Config("config is not valid UTF-8".to_string()))?;
        EngineConfig::from_json(&json)?
    };
    DeathLoopEngine::new(config)
}

fn finish(result: Result<String, EngineError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn render_scripts(engine: &DeathLoopEngine, rows_json: &str) -> Result<String, EngineError> {
    let rows = UsageRowAdapter::parse_array(rows_json)?;
    let analysis = engine.analyze(&rows);
    Ok(serde_json::to_string(&analysis.scripts)?)
}

// ============================================================================
// Stateless API
// ============================================================================

/// Analyze usage rows JSON and return the report JSON.
///
/// # Safety
/// - `rows_json` must be a valid null-terminated C string.
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Returns a newly allocated string that must be freed with `loopwatch_free_string`.
/// - Returns NULL on error; call `loopwatch_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn loopwatch_analyze(rows_json: *const c_char, config_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let rows = match cstr_to_string(rows_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid rows JSON string pointer");
            return ptr::null_mut();
        }
    };

    finish(engine_from(config_json).and_then(|engine| engine.analyze_json(&rows)))
}

/// Analyze usage rows JSON and return the generated scripts as a JSON array.
///
/// Each element carries `template_id`, `pattern_key`, `target_apps`,
/// `file_name` and `rendered_source`.
///
/// # Safety
/// - `rows_json` must be a valid null-terminated C string.
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Returns a newly allocated string that must be freed with `loopwatch_free_string`.
/// - Returns NULL on error; call `loopwatch_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn loopwatch_render_scripts(
    rows_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let rows = match cstr_to_string(rows_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid rows JSON string pointer");
            return ptr::null_mut();
        }
    };

    finish(engine_from(config_json).and_then(|engine| render_scripts(&engine, &rows)))
}

// ============================================================================
// Engine API
// ============================================================================

/// Opaque handle to a configured engine
pub struct LoopwatchEngineHandle {
    engine: DeathLoopEngine,
}

/// Create an engine.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Returns a pointer that must be freed with `loopwatch_engine_free`.
/// - Returns NULL on an invalid configuration; call `loopwatch_last_error`.
#[no_mangle]
pub unsafe extern "C" fn loopwatch_engine_new(config_json: *const c_char) -> *mut LoopwatchEngineHandle {
    clear_last_error();

    match engine_from(config_json) {
        Ok(engine) => Box::into_raw(Box::new(LoopwatchEngineHandle { engine })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `loopwatch_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn loopwatch_engine_free(engine: *mut LoopwatchEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Analyze usage rows JSON with an existing engine and return the report JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `loopwatch_engine_new`.
/// - `rows_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `loopwatch_free_string`.
/// - Returns NULL on error; call `loopwatch_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn loopwatch_engine_analyze(
    engine: *const LoopwatchEngineHandle,
    rows_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let rows = match cstr_to_string(rows_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid rows JSON string pointer");
            return ptr::null_mut();
        }
    };

    finish(handle.engine.analyze_json(&rows))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by loopwatch functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a loopwatch function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn loopwatch_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next loopwatch function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn loopwatch_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the loopwatch library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn loopwatch_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn sample_rows_json() -> CString {
        // Mail and Notes, 7s each with 3s of dead time, 200 times over
        let rows: Vec<String> = (0..200)
            .map(|i| {
                let start = 700_000_000 + i * 10;
                let app = if i % 2 == 0 { "com.apple.mail" } else { "com.apple.Notes" };
                format!(
                    r#"{{"start": {start}, "end": {}, "app": "{app}", "stream": "/app/usage"}}"#,
                    start + 7
                )
            })
            .collect();
        CString::new(format!("[{}]", rows.join(","))).unwrap()
    }

    fn read_and_free(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        unsafe {
            let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
            loopwatch_free_string(ptr);
            s
        }
    }

    #[test]
    fn test_ffi_analyze() {
        let rows = sample_rows_json();
        let report = read_and_free(unsafe { loopwatch_analyze(rows.as_ptr(), ptr::null()) });
        let value: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(value["total_switches"], 199);
        assert_eq!(value["producer"]["name"], "loopwatch");
    }

    #[test]
    fn test_ffi_render_scripts() {
        let rows = sample_rows_json();
        let config = CString::new(r#"{"generation": {"high_frequency": 50, "severity_floor": "low"}}"#).unwrap();
        let scripts = read_and_free(unsafe { loopwatch_render_scripts(rows.as_ptr(), config.as_ptr()) });
        let value: serde_json::Value = serde_json::from_str(&scripts).unwrap();

        assert_eq!(value[0]["template_id"], "bounce-killer");
        assert!(value[0]["rendered_source"].as_str().unwrap().contains("return M"));
    }

    #[test]
    fn test_ffi_engine_lifecycle() {
        unsafe {
            let engine = loopwatch_engine_new(ptr::null());
            assert!(!engine.is_null());

            let rows = sample_rows_json();
            let first = read_and_free(loopwatch_engine_analyze(engine, rows.as_ptr()));
            let second = read_and_free(loopwatch_engine_analyze(engine, rows.as_ptr()));
            assert_eq!(first, second);

            loopwatch_engine_free(engine);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid_json = CString::new("not json").unwrap();
            let result = loopwatch_analyze(invalid_json.as_ptr(), ptr::null());
            assert!(result.is_null());

            let error = loopwatch_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            let bad_config = CString::new(r#"{"window_days": 0}"#).unwrap();
            assert!(loopwatch_engine_new(bad_config.as_ptr()).is_null());
            let error_str = CStr::from_ptr(loopwatch_last_error()).to_str().unwrap();
            assert!(error_str.contains("window_days"));
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = loopwatch_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
