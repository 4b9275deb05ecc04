//! Safe FFI utility functions: pointer validation, C string conversion, and
//! the error-channel write.
//!
//! Every string handed to the host is allocated here via [`CString`] and must
//! come back through [`free_c_string`]; host and bridge may link different C
//! runtimes, so returned pointers are never valid input to the host's own
//! allocator.

use crate::{Client, Error};
use libc::c_char;
use std::ffi::{CStr, CString};

/// Error JSON emitted when serializing the real error fails. Kept free of
/// interior NULs so [`CString::new`] cannot reject it.
const FALLBACK_ERROR_JSON: &str =
    r#"{"kind":"internal_error","message":"error serialization failed"}"#;

/// Safely convert a raw client pointer to a reference.
///
/// # Errors
///
/// Returns [`Error::NullPointer`] if the provided pointer is null.
///
/// # Safety
///
/// The caller must ensure the pointer is valid and properly aligned.
pub fn client_ref<'a>(client: *const Client) -> Result<&'a Client, Error> {
    if client.is_null() {
        Err(Error::NullPointer)
    } else {
        unsafe { Ok(&*client) }
    }
}

/// Safely convert a raw C string to a Rust [`String`].
///
/// # Errors
///
/// Returns [`Error::NullPointer`] if the provided pointer is null, or
/// [`Error::Utf8`] if the C string contains invalid UTF-8.
///
/// # Safety
///
/// The caller must ensure the pointer points to a valid null-terminated C string.
pub fn c_str_to_string(c_string_ptr: *const c_char) -> Result<String, Error> {
    if c_string_ptr.is_null() {
        Err(Error::NullPointer)
    } else {
        unsafe {
            let c_string = CStr::from_ptr(c_string_ptr);
            Ok(c_string.to_str()?.to_owned())
        }
    }
}

/// Safely convert an optional C string (can be null) to an [`Option<String>`].
///
/// # Errors
///
/// Returns [`Error::Utf8`] if the C string contains invalid UTF-8.
///
/// # Safety
///
/// If not null, the caller must ensure the pointer points to a valid null-terminated C string.
pub fn optional_c_str_to_string(c_string_ptr: *const c_char) -> Result<Option<String>, Error> {
    if c_string_ptr.is_null() {
        Ok(None)
    } else {
        Ok(Some(c_str_to_string(c_string_ptr)?))
    }
}

/// Convert a Rust [`String`] to a C string pointer, transferring ownership to
/// the caller.
///
/// # Errors
///
/// Returns [`Error::StringConversion`] if the string contains null bytes.
pub fn string_to_c_str(string: String) -> Result<*mut c_char, Error> {
    CString::new(string)
        .map(|cs| cs.into_raw())
        .map_err(|e| Error::StringConversion(e.to_string()))
}

/// Safely free a boxed client pointer.
///
/// # Safety
///
/// The caller must ensure the pointer was created by [`Box::into_raw`] and hasn't been freed.
pub fn free_boxed_client(client: *mut Client) {
    if !client.is_null() {
        unsafe {
            drop(Box::from_raw(client));
        }
    }
}

/// Safely free a C string created by this library.
///
/// # Safety
///
/// The caller must ensure the pointer was created by [`CString::into_raw`] and hasn't been freed.
pub fn free_c_string(c_string_ptr: *mut c_char) {
    if !c_string_ptr.is_null() {
        unsafe {
            drop(CString::from_raw(c_string_ptr));
        }
    }
}

/// Write the error-channel JSON (`{"kind": ..., "message": ...}`) into the
/// out-slot. On success paths the out-slot is never touched; callers
/// pre-initialize it to null.
///
/// # Safety
///
/// The caller must ensure `error_out` points to a valid mutable pointer.
pub fn set_error(error_out: *mut *mut c_char, error: &Error) {
    if error_out.is_null() {
        return;
    }

    let body = serde_json::json!({
        "kind": error.kind().to_string(),
        "message": error.to_string(),
    });
    let json =
        serde_json::to_string(&body).unwrap_or_else(|_| FALLBACK_ERROR_JSON.to_string());

    // serde_json escapes control characters, so the JSON text never carries a
    // raw NUL; the fallback covers the remaining impossible case.
    let c_error = CString::new(json).unwrap_or_default();
    unsafe {
        *error_out = c_error.into_raw();
    }
}

/// Macro for handling FFI results.
///
/// On success, applies the success transformation and leaves the error
/// out-slot untouched. On error, writes the error JSON and returns null.
#[macro_export]
macro_rules! handle_ffi_result {
    ($result:expr, $error_out:expr, $success_transform:expr) => {
        match $result {
            Ok(success_value) => $success_transform(success_value),
            Err(error) => {
                $crate::safe_ffi::set_error($error_out, &error);
                ptr::null_mut()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::ffi::CString;
    use std::ptr;

    fn parse_error(error_ptr: *mut c_char) -> serde_json::Value {
        assert!(!error_ptr.is_null());
        let json = unsafe { CStr::from_ptr(error_ptr) }
            .to_str()
            .unwrap()
            .to_owned();
        free_c_string(error_ptr);
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_client_ref_null_pointer() {
        let result = client_ref(ptr::null());
        assert!(matches!(result, Err(Error::NullPointer)));
    }

    #[test]
    fn test_c_str_to_string_valid() {
        let test_string = "Hello, World!";
        let c_string = CString::new(test_string).unwrap();

        let result = c_str_to_string(c_string.as_ptr());
        assert_eq!(result.unwrap(), test_string);
    }

    #[test]
    fn test_c_str_to_string_null_pointer() {
        let result = c_str_to_string(ptr::null());
        assert!(matches!(result, Err(Error::NullPointer)));
    }

    #[test]
    fn test_c_str_to_string_invalid_utf8() {
        let invalid_bytes = [0xFF, 0xFE, 0x00]; // Invalid UTF-8 sequence + null terminator
        let c_string_ptr = invalid_bytes.as_ptr() as *const c_char;

        let result = c_str_to_string(c_string_ptr);
        assert!(matches!(result, Err(Error::Utf8(_))));
    }

    #[test]
    fn test_optional_c_str_to_string_null() {
        let result = optional_c_str_to_string(ptr::null());
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn test_string_to_c_str_round_trip() {
        let test_string = "Test string".to_string();
        let c_string_ptr = string_to_c_str(test_string.clone()).unwrap();

        let restored = unsafe { CStr::from_ptr(c_string_ptr) };
        assert_eq!(restored.to_str().unwrap(), test_string);

        free_c_string(c_string_ptr);
    }

    #[test]
    fn test_string_to_c_str_with_null_byte() {
        let test_string = "String\0with\0nulls".to_string();
        let result = string_to_c_str(test_string);

        assert!(matches!(result, Err(Error::StringConversion(_))));
    }

    #[test]
    fn test_free_functions_accept_null() {
        free_boxed_client(ptr::null_mut());
        free_c_string(ptr::null_mut());
    }

    #[test]
    fn test_set_error_null_out_slot_is_noop() {
        set_error(ptr::null_mut(), &Error::NullPointer);
    }

    #[test]
    fn test_set_error_writes_kind_and_message() {
        let mut error_ptr: *mut c_char = ptr::null_mut();
        set_error(&mut error_ptr as *mut *mut c_char, &Error::NullPointer);

        let body = parse_error(error_ptr);
        assert_eq!(body["kind"], ErrorKind::InvalidRequest.to_string());
        assert!(body["message"].as_str().unwrap().contains("null pointer"));
    }

    #[test]
    fn test_handle_ffi_result_macro_success_leaves_out_slot_untouched() {
        let mut error_ptr: *mut c_char = ptr::null_mut();
        let error_out = &mut error_ptr as *mut *mut c_char;

        let result: Result<String, Error> = Ok("success".to_string());
        let output = handle_ffi_result!(result, error_out, |string: String| {
            string_to_c_str(string).unwrap_or(ptr::null_mut())
        });

        assert!(!output.is_null());
        assert!(error_ptr.is_null());

        free_c_string(output);
    }

    #[test]
    fn test_handle_ffi_result_macro_error_sets_out_slot() {
        let mut error_ptr: *mut c_char = ptr::null_mut();
        let error_out = &mut error_ptr as *mut *mut c_char;

        let result: Result<String, Error> = Err(Error::NullPointer);
        let output = handle_ffi_result!(result, error_out, |string: String| {
            string_to_c_str(string).unwrap_or(ptr::null_mut())
        });

        assert!(output.is_null());
        let body = parse_error(error_ptr);
        assert_eq!(body["kind"], "invalid_request");
    }
}
