#![no_main]
use libfuzzer_sys::fuzz_target;
use safeview::{MappedFile, TensorSource};
use std::io::Write;

fuzz_target!(|data: &[u8]| {
    let mut tmp = tempfile::Builder::new()
        .suffix(".safetensors")
        .tempfile()
        .unwrap();
    tmp.write_all(data).unwrap();

    let mapped = match MappedFile::open(tmp.path()) {
        Ok(m) => m,
        Err(_) => return,
    };

    for name in mapped.names() {
        let _ = mapped.tensor(name).map(|v| v.to_vec::<u8>());
    }
    mapped.close();
});
