#![no_main]
use lanetrade_core::kernel::Kernel;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Must not panic -- returning Err is fine.
    if let Ok(mut kernel) = Kernel::from_save_string(text) {
        let _ = kernel.step();
        if let Ok(saved) = kernel.save_to_string() {
            let _ = Kernel::from_save_string(&saved);
        }
    }
});
