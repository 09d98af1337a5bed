//! Viewer page served at `/`

use crate::config::DeviceConfig;

const STYLE: &str = "\
body { font-family: sans-serif; text-align: center; background: #1a1a1a; color: #eee; margin: 0; padding: 20px; }
h1 { color: #4caf50; }
.info { background: #2a2a2a; border-radius: 8px; margin: 20px auto; max-width: 600px; padding: 12px; }
img { max-width: 90vw; max-height: 80vh; border: 2px solid #4caf50; border-radius: 8px; }";

/// Render the page for one device
pub fn render(device: &DeviceConfig) -> String {
    let name = escape(&device.name);
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <title>{name} Stream</title>\n\
         <style>\n{style}\n</style>\n\
         </head>\n\
         <body>\n\
         <h1>{name}</h1>\n\
         <div class=\"info\">\n\
         <p><strong>Device:</strong> {device}</p>\n\
         <p><strong>Resolution:</strong> {resolution}</p>\n\
         <p><strong>FPS:</strong> {fps}</p>\n\
         <p><strong>Rotation:</strong> {rotation}&deg;</p>\n\
         </div>\n\
         <img src=\"/stream\" alt=\"{name} live stream\">\n\
         </body>\n\
         </html>\n",
        name = name,
        style = STYLE,
        device = escape(&device.device),
        resolution = device.resolution,
        fps = device.framerate,
        rotation = device.rotation.degrees(),
    )
}

/// Escape text for HTML element content and attribute values
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
