#![no_main]

use libfuzzer_sys::fuzz_target;
use runhub_core::secrets::{mask_secrets, MASK};

// The masker must never panic on arbitrary process output, and a known
// secret must never survive masking verbatim.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let secrets = vec!["hunter2-fuzz-secret".to_string(), "s3cr3t".to_string()];
    let masked = mask_secrets(text, &secrets);

    for secret in &secrets {
        assert!(
            !masked.contains(secret.as_str()),
            "secret survived masking: {masked:?}"
        );
    }

    // Masking an already-masked string must be stable for known secrets.
    let twice = mask_secrets(&masked, &secrets);
    for secret in &secrets {
        assert!(!twice.contains(secret.as_str()));
    }

    let _ = MASK;
});
