#![no_main]
use lanetrade_core::kernel::Kernel;
use lanetrade_core::serialize::read_snapshot_header;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Must not panic -- returning Err is fine.
    let _ = read_snapshot_header(data);
    if let Ok(mut kernel) = Kernel::deserialize(data) {
        let _ = kernel.step();
    }
});
