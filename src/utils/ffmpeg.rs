use std::sync::Once;

static FFMPEG_INIT: Once = Once::new();

/// Initialise FFmpeg's process-wide state. Safe to call from any thread,
/// any number of times; the codec and muxer components assume this has
/// run before they touch the library.
pub fn ensure_init() {
    FFMPEG_INIT.call_once(|| {
        ffmpeg_next::init().expect("Failed to initialise FFmpeg");
    });
}
