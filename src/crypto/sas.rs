/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Short authentication string rendering. The SAS value is the leftmost
//! 32 bits of the SAS hash; the negotiated SAS type turns it into the
//! string users read to each other.

/// Negotiable SAS rendering schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SasType {
    /// Four base-32 characters from the leftmost 20 bits, mandatory.
    B32,
    /// Two PGP words, one from the even list and one from the odd list.
    B256,
    /// Six decimal digits, for locales where letters do not work well.
    B10D,
}

impl SasType {
    pub const MANDATORY: SasType = SasType::B32;

    pub fn code(&self) -> &'static [u8; 4] {
        match self {
            SasType::B32 => b"B32 ",
            SasType::B256 => b"B256",
            SasType::B10D => b"B10D",
        }
    }

    pub fn from_code(code: &[u8]) -> Option<Self> {
        match code {
            b"B32 " => Some(SasType::B32),
            b"B256" => Some(SasType::B256),
            b"B10D" => Some(SasType::B10D),
            _ => None,
        }
    }

    /// Render the user-visible SAS from the leftmost 32 bits of the SAS hash.
    pub fn render(&self, sas_value: [u8; 4]) -> String {
        match self {
            SasType::B32 => base32_words(sas_value),
            SasType::B256 => {
                let even = PGP_WORDS_EVEN[sas_value[0] as usize];
                let odd = PGP_WORDS_ODD[sas_value[1] as usize];
                format!("{}:{}", even, odd)
            }
            SasType::B10D => {
                let v = u32::from_be_bytes(sas_value);
                format!("{:06}", v % 1_000_000)
            }
        }
    }
}

// z-base-32, the alphabet RFC 6189 section 5.1.6 borrows for B32.
const ZBASE32: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// Encode the leftmost 20 bits into four base-32 characters.
fn base32_words(sas_value: [u8; 4]) -> String {
    let bits = u32::from_be_bytes(sas_value) >> 12;
    let mut out = String::with_capacity(4);
    for i in (0..4).rev() {
        let idx = ((bits >> (i * 5)) & 0x1f) as usize;
        out.push(ZBASE32[idx] as char);
    }
    out
}

/// PGP word list, even bytes (two-syllable words).
pub const PGP_WORDS_EVEN: [&str; 256] = [
    "aardvark", "absurd", "accrue", "acme", "adrift", "adult", "afflict", "ahead",
    "aimless", "Algol", "allow", "alone", "ammo", "ancient", "apple", "artist",
    "assume", "Athens", "atlas", "Aztec", "baboon", "backfield", "backward", "banjo",
    "beaming", "bedlamp", "beehive", "beeswax", "befriend", "Belfast", "berserk", "billiard",
    "bison", "blackjack", "blockade", "blowtorch", "bluebird", "bombast", "bookshelf", "brackish",
    "breadline", "breakup", "brickyard", "briefcase", "Burbank", "button", "buzzard", "cement",
    "chairlift", "chatter", "checkup", "chisel", "choking", "chopper", "Christmas", "clamshell",
    "classic", "classroom", "cleanup", "clockwork", "cobra", "commence", "concert", "cowbell",
    "crackdown", "cranky", "crowfoot", "crucial", "crumpled", "crusade", "cubic", "dashboard",
    "deadbolt", "deckhand", "dogsled", "dragnet", "drainage", "dreadful", "drifter", "dropper",
    "drumbeat", "drunken", "Dupont", "dwelling", "eating", "edict", "egghead", "eightball",
    "endorse", "endow", "enlist", "erase", "escape", "exceed", "eyeglass", "eyetooth",
    "facial", "fallout", "flagpole", "flatfoot", "flytrap", "fracture", "framework", "freedom",
    "frighten", "gazelle", "Geiger", "glitter", "glucose", "goggles", "goldfish", "gremlin",
    "guidance", "hamlet", "highchair", "hockey", "indoors", "indulge", "inverse", "involve",
    "island", "jawbone", "keyboard", "kickoff", "kiwi", "klaxon", "locale", "lockup",
    "merit", "minnow", "miser", "Mohawk", "mural", "music", "necklace", "Neptune",
    "newborn", "nightbird", "Oakland", "obtuse", "offload", "optic", "orca", "payday",
    "peachy", "pheasant", "physique", "playhouse", "Pluto", "preclude", "prefer", "preshrunk",
    "printer", "prowler", "pupil", "puppy", "python", "quadrant", "quiver", "quota",
    "ragtime", "ratchet", "rebirth", "reform", "regain", "reindeer", "rematch", "repay",
    "retouch", "revenge", "reward", "rhythm", "ribcage", "ringbolt", "robust", "rocker",
    "ruffled", "sailboat", "sawdust", "scallion", "scenic", "scorecard", "Scotland", "seabird",
    "select", "sentence", "shadow", "shamrock", "showgirl", "skullcap", "skydive", "slingshot",
    "slowdown", "snapline", "snapshot", "snowcap", "snowslide", "solo", "southward", "soybean",
    "spaniel", "spearhead", "spellbind", "spheroid", "spigot", "spindle", "spyglass", "stagehand",
    "stagnate", "stairway", "standard", "stapler", "steamship", "sterling", "stockman", "stopwatch",
    "stormy", "sugar", "surmount", "suspense", "sweatband", "swelter", "tactics", "talon",
    "tapeworm", "tempest", "tiger", "tissue", "tonic", "topmost", "tracker", "transit",
    "trauma", "treadmill", "Trojan", "trouble", "tumor", "tunnel", "tycoon", "uncut",
    "unearth", "unwind", "uproot", "upset", "upshot", "vapor", "village", "virus",
    "Vulcan", "waffle", "wallet", "watchword", "wayside", "willow", "woodlark", "Zulu",
];

/// PGP word list, odd bytes (three-syllable words).
pub const PGP_WORDS_ODD: [&str; 256] = [
    "adroitness", "adviser", "aftermath", "aggregate", "alkali", "almighty", "amulet", "amusement",
    "antenna", "applicant", "Apollo", "armistice", "article", "asteroid", "Atlantic", "atmosphere",
    "autopsy", "Babylon", "backwater", "barbecue", "belowground", "bifocals", "bodyguard", "bookseller",
    "borderline", "bottomless", "Bradbury", "bravado", "Brazilian", "breakaway", "Burlington", "businessman",
    "butterfat", "Camelot", "candidate", "cannonball", "Capricorn", "caravan", "caretaker", "celebrate",
    "cellulose", "certify", "chambermaid", "Cherokee", "Chicago", "clergyman", "coherence", "combustion",
    "commando", "company", "component", "concurrent", "confidence", "conformist", "congregate", "consensus",
    "consulting", "corporate", "corrosion", "councilman", "crossover", "crucifix", "cumbersome", "customer",
    "Dakota", "decadence", "December", "decimal", "designing", "detector", "detergent", "determine",
    "dictator", "dinosaur", "direction", "disable", "disbelief", "disruptive", "distortion", "document",
    "embezzle", "enchanting", "enrollment", "enterprise", "equation", "equipment", "escapade", "Eskimo",
    "everyday", "examine", "existence", "exodus", "fascinate", "filament", "finicky", "forever",
    "fortitude", "frequency", "gadgetry", "Galveston", "getaway", "glossary", "gossamer", "graduate",
    "gravity", "guitarist", "hamburger", "Hamilton", "handiwork", "hazardous", "headwaters", "hemisphere",
    "hesitate", "hideaway", "holiness", "hurricane", "hydraulic", "impartial", "impetus", "inception",
    "indigo", "inertia", "infancy", "inferno", "informant", "insincere", "insurgent", "integrate",
    "intention", "inventive", "Istanbul", "Jamaica", "Jupiter", "leprosy", "letterhead", "liberty",
    "maritime", "matchmaker", "maverick", "Medusa", "megaton", "microscope", "microwave", "midsummer",
    "millionaire", "miracle", "misnomer", "molasses", "molecule", "Montana", "monument", "mosquito",
    "narrative", "nebula", "newsletter", "Norwegian", "October", "Ohio", "onlooker", "opulent",
    "Orlando", "outfielder", "Pacific", "pandemic", "Pandora", "paperweight", "paragon", "paragraph",
    "paramount", "passenger", "pedigree", "Pegasus", "penetrate", "perceptive", "performance", "pharmacy",
    "phonetic", "photograph", "pioneer", "pocketful", "politeness", "positive", "potato", "processor",
    "provincial", "proximate", "puberty", "publisher", "pyramid", "quantity", "racketeer", "rebellion",
    "recipe", "recover", "repellent", "replica", "reproduce", "resistor", "responsive", "retraction",
    "retrieval", "retrospect", "revenue", "revival", "revolver", "sandalwood", "sardonic", "Saturday",
    "savagery", "scavenger", "sensation", "sociable", "souvenir", "specialist", "speculate", "stethoscope",
    "stupendous", "supportive", "surrender", "suspicious", "sympathy", "tambourine", "telephone", "therapist",
    "tobacco", "tolerance", "tomorrow", "torpedo", "tradition", "travesty", "trombonist", "truncated",
    "typewriter", "ultimate", "undaunted", "underfoot", "unicorn", "unify", "universe", "unravel",
    "upcoming", "vacancy", "vagabond", "vertigo", "Virginia", "visitor", "vocalist", "voyager",
    "warranty", "Waterloo", "whimsical", "Wichita", "Wilmington", "Wyoming", "yesteryear", "Yucatan",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for t in [SasType::B32, SasType::B256, SasType::B10D] {
            assert_eq!(SasType::from_code(t.code()), Some(t));
        }
    }

    #[test]
    fn b32_renders_four_characters() {
        let sas = SasType::B32.render([0xab, 0xcd, 0xef, 0x01]);
        assert_eq!(sas.len(), 4);
        assert!(sas.bytes().all(|b| ZBASE32.contains(&b)));
    }

    #[test]
    fn b32_uses_leftmost_twenty_bits_only() {
        let a = SasType::B32.render([0xab, 0xcd, 0xe0, 0x00]);
        let b = SasType::B32.render([0xab, 0xcd, 0xef, 0xff]);
        assert_eq!(a, b);
    }

    #[test]
    fn b256_picks_even_and_odd_words() {
        let sas = SasType::B256.render([0, 1, 0, 0]);
        assert_eq!(sas, "aardvark:adviser");
    }

    #[test]
    fn b10d_is_six_digits() {
        let sas = SasType::B10D.render([0xff, 0xff, 0xff, 0xff]);
        assert_eq!(sas.len(), 6);
        assert!(sas.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn word_lists_are_complete() {
        assert_eq!(PGP_WORDS_EVEN.len(), 256);
        assert_eq!(PGP_WORDS_ODD.len(), 256);
    }
}
