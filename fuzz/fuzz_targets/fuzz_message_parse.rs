#![no_main]
use libfuzzer_sys::fuzz_target;
use tlsprobe_core::parser::dispatch;
use tlsprobe_core::record::ContentType;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let content_type = ContentType::from_u8(selector & 0x1F).ok();
    let is_fragment = selector & 0x20 != 0;
    let https = selector & 0x40 != 0;
    let _ = dispatch(rest, content_type, is_fragment, https);
});
