//! Decorative description templates.
//!
//! Two fixed phrase tables; one phrase is drawn uniformly at random and
//! appended verbatim to the item description (each phrase carries its own
//! leading separator). The tables are static data, not user-configurable.

use crate::core::types::Template;
use rand::seq::IndexedRandom;

const TEMPLATE1: &[&str] = &[
    ", high resolution",
    ", aesthetic background",
    ", stunning visual effect",
    ", detailed texture",
    ", artistic vibe",
    ", captivating background",
    ", high quality result",
    ", elegant style",
    ", mesmerizing view",
    ", beautiful background",
    ", professional touch",
    ", vibrant tone",
    ", luxurious feel",
    ", cinematic background",
    ", colorful theme",
    ", minimalist background",
    ", vintage charm",
    ", futuristic concept",
    ", abstract background",
    ", modern aesthetic",
    ", polished appearance",
    ", seamless texture",
    ", harmonious background",
    ", immersive atmosphere",
    ", nature-inspired background",
    ", bold composition",
    ", intricate background design",
    ", glossy reflection",
    ", refined elegance",
    ", subtle gradient",
    ", dreamy concept",
    ", expressive background details",
    ", creative perspective",
    ", layered depth",
    ", smooth transitions",
    ", timeless background beauty",
    ", fresh tone",
    ", urban background",
    ", artistic arrangement",
    ", dynamic background flow",
];

const TEMPLATE2: &[&str] = &[
    ", glowing background effect",
    ", intricate detail",
    ", serene vibe",
    ", cozy background atmosphere",
    ", exotic touch",
    ", pastel background tone",
    ", bold appearance",
    ", surreal background theme",
    ", enchanting mood",
    ", rustic texture",
    ", glossy background finish",
    ", monochrome style",
    ", geometric background pattern",
    ", dynamic flow",
    ", dreamy and soft background gradient",
    ", playful design",
    ", refined background touch",
    ", sophisticated detail",
    ", urban aesthetic",
    ", whimsical background charm",
    ", radiant glow",
    ", natural elegance",
    ", fluid motion",
    ", stylish background execution",
    ", polished lines",
    ", innovative background concept",
    ", vibrant highlights",
    ", balanced composition",
    ", gentle background curves",
    ", cool tones",
    ", modern simplicity",
    ", artistic harmony",
    ", textured dimension",
    ", vivid saturation",
    ", contrasting background elements",
    ", fresh composition",
    ", subtle details",
    ", timeless atmosphere",
    ", bright inspiration",
    ", dynamic background perspective",
];

/// Draw a random phrase for the selected template; `Template::None` → `""`.
pub fn sample_template_phrase(template: Template) -> &'static str {
    let table = match template {
        Template::None => return "",
        Template::Template1 => TEMPLATE1,
        Template::Template2 => TEMPLATE2,
    };
    let mut rng = rand::rng();
    table.choose(&mut rng).copied().unwrap_or("")
}
