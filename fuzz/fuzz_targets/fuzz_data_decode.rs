#![no_main]
use ipfold::data_section::DataDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let decoder = DataDecoder::new(data);
    for offset in 0..data.len().min(64) as u32 {
        let _ = decoder.decode(offset);
    }
});
