use super::*;

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn vectors_are_normalized() {
    let embedder = HashingEmbedder::new(64);
    let vector = embedder
        .embed_one("vector similarity search")
        .expect("embedding should succeed");

    assert_eq!(vector.len(), 64);
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4, "norm was {norm}");
}

#[test]
fn deterministic_for_same_input() {
    let embedder = HashingEmbedder::new(32);
    let texts = vec!["Hello world".to_string(), "hello WORLD".to_string()];
    let vectors = embedder.embed_many(&texts).expect("embedding should succeed");

    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0], vectors[1]);
}

#[test]
fn shared_vocabulary_is_closer() {
    let embedder = HashingEmbedder::new(256);
    let query = embedder.embed_one("rust ownership borrowing").expect("embed");
    let related = embedder
        .embed_one("ownership and borrowing in rust")
        .expect("embed");
    let unrelated = embedder
        .embed_one("baking sourdough bread at home")
        .expect("embed");

    assert!(cosine(&query, &related) > cosine(&query, &unrelated));
}

#[test]
fn empty_text_is_zero_vector() {
    let embedder = HashingEmbedder::new(8);
    let vector = embedder.embed_one("   ").expect("embedding should succeed");

    assert_eq!(vector, vec![0.0; 8]);
}

#[test]
fn seed_changes_projection() {
    let text = "alpha bravo charlie delta echo foxtrot golf hotel india juliet \
        kilo lima mike november oscar papa quebec romeo sierra tango";
    let plain = HashingEmbedder::new(128).embed_one(text).expect("embed");
    let seeded = HashingEmbedder::new(128)
        .with_seed(7)
        .embed_one(text)
        .expect("embed");

    assert_ne!(plain, seeded);
}
