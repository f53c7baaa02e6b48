//! Random names, descriptions, images and prices for scenario runs and for
//! CLI commands invoked without explicit values.

use rand::seq::SliceRandom;
use rand::Rng;

use nftflow_orchestrator::operation::{
    Address, LaunchCollectionParams, MintParams, NftMetadata, NftPermissions, Trait, TraitKind,
};

const ADJECTIVES: &[&str] = &[
    "Amber", "Silent", "Copper", "Drifting", "Hollow", "Lunar", "Quiet", "Rusty", "Velvet",
    "Wild", "Frozen", "Golden",
];

const NOUNS: &[&str] = &[
    "Harbor", "Pebble", "Lantern", "Comet", "Meadow", "Falcon", "Orchard", "Tide", "Summit",
    "Willow", "Ember", "Canyon",
];

const WORDS: &[&str] = &[
    "light", "stone", "river", "over", "under", "morning", "glass", "slowly", "bright", "paper",
    "field", "across", "small", "the", "a", "of", "and", "old", "distant", "song",
];

/// Two capitalised words, e.g. "Velvet Comet".
pub fn random_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("Plain");
    let noun = NOUNS.choose(rng).copied().unwrap_or("Token");
    format!("{} {}", adjective, noun)
}

/// Upper-case ticker derived from a name.
pub fn symbol_for(name: &str) -> String {
    let symbol: String = name
        .split_whitespace()
        .filter_map(|w| w.chars().next())
        .chain(name.chars().filter(|c| c.is_ascii_alphabetic()).skip(1))
        .take(5)
        .collect();
    symbol.to_ascii_uppercase()
}

/// A sentence of ten to twenty words.
pub fn random_text<R: Rng + ?Sized>(rng: &mut R) -> String {
    let len = rng.gen_range(10..=20);
    let mut words: Vec<&str> = (0..len)
        .filter_map(|_| WORDS.choose(rng).copied())
        .collect();
    let mut text = String::new();
    if let Some(first) = words.first_mut() {
        let mut chars = first.chars();
        if let Some(c) = chars.next() {
            text.push(c.to_ascii_uppercase());
            text.push_str(chars.as_str());
        }
    }
    for word in words.iter().skip(1) {
        text.push(' ');
        text.push_str(word);
    }
    text.push('.');
    text
}

pub fn random_image<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("https://picsum.photos/seed/{}/540/670", rng.gen::<u32>())
}

pub fn random_banner<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("https://picsum.photos/seed/{}/1920/300", rng.gen::<u32>())
}

/// A price between 10 and 100 in steps of 10.
pub fn random_price<R: Rng + ?Sized>(rng: &mut R) -> u64 {
    rng.gen_range(1..=10) * 10
}

pub fn collection_params<R: Rng + ?Sized>(rng: &mut R) -> LaunchCollectionParams {
    let name = random_name(rng);
    LaunchCollectionParams {
        symbol: symbol_for(&name),
        admin_contract: "standard".into(),
        master_nft: NftMetadata {
            name: name.clone(),
            image: random_image(rng),
            banner: Some(random_banner(rng)),
            description: random_text(rng),
            traits: vec![],
        },
        collection_name: name,
    }
}

/// Mint parameters with one public and one private trait.
pub fn mint_params<R: Rng + ?Sized>(rng: &mut R, owner: &Address, soulbound: bool) -> MintParams {
    let name = random_name(rng);
    let permissions = if soulbound {
        NftPermissions::soulbound()
    } else {
        NftPermissions::default()
    };
    MintParams {
        name: name.clone(),
        owner: owner.clone(),
        permissions,
        metadata: NftMetadata {
            name,
            image: random_image(rng),
            banner: None,
            description: random_text(rng),
            traits: vec![
                Trait {
                    key: "Rarity".into(),
                    kind: TraitKind::String,
                    value: ["common", "rare", "epic"]
                        .choose(rng)
                        .copied()
                        .unwrap_or("common")
                        .into(),
                    is_private: false,
                },
                Trait {
                    key: "Secret".into(),
                    kind: TraitKind::Text,
                    value: random_text(rng),
                    is_private: true,
                },
            ],
        },
    }
}
