use super::*;
use crate::index::DistanceMetric;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.embedding.backend, EmbeddingBackend::Ollama);
    assert_eq!(config.embedding.protocol, "http");
    assert_eq!(config.embedding.host, "localhost");
    assert_eq!(config.embedding.port, 11434);
    assert_eq!(config.embedding.embedding_dimension, 384);
    assert_eq!(config.chunking.chunk_size, 500);
    assert_eq!(config.chunking.chunk_overlap, 50);
    assert_eq!(config.index.cluster_count, 100);
    assert_eq!(config.index.probe_count, 10);
    assert_eq!(config.index.metric, DistanceMetric::Euclidean);
    assert_eq!(config.search.default_top_k, 5);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.embedding.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.embedding_dimension = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidEmbeddingDimension(0))
    ));

    let mut invalid_config = config;
    invalid_config.search.default_top_k = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTopK(0))
    ));
}

#[test]
fn chunking_validation() {
    let mut config = Config::default();
    config.chunking.chunk_overlap = config.chunking.chunk_size;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidChunking(_))
    ));

    config.chunking.chunk_size = 0;
    config.chunking.chunk_overlap = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidChunking(_))
    ));
}

#[test]
fn index_validation() {
    let mut config = Config::default();
    config.index.probe_count = config.index.cluster_count + 1;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidProbeCount(101, 100))
    ));

    let mut config = Config::default();
    config.index.cluster_count = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidClusterCount(0))
    ));

    let mut config = Config::default();
    config.index.convergence_tolerance = f32::NAN;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidTolerance(_))
    ));
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn https_url_generation() {
    let mut config = Config::default();
    config.embedding.protocol = "https".to_string();
    config.embedding.host = "secure.example.com".to_string();
    config.embedding.port = 443;

    let url = config
        .ollama_url()
        .expect("should generate https url successfully");
    assert_eq!(url.as_str(), "https://secure.example.com/");
}

#[test]
fn toml_serialization() {
    let mut config = Config::default();
    config.index.rebuild_after_inserts = Some(5000);
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let toml_str = r#"
        [embedding]
        backend = "hashing"
        embedding_dimension = 64

        [index]
        cluster_count = 16
        probe_count = 4
        metric = "cosine"
    "#;

    let config: Config = toml::from_str(toml_str).expect("should parse partial toml");
    assert_eq!(config.embedding.backend, EmbeddingBackend::Hashing);
    assert_eq!(config.embedding.embedding_dimension, 64);
    assert_eq!(config.embedding.host, "localhost");
    assert_eq!(config.index.cluster_count, 16);
    assert_eq!(config.index.metric, DistanceMetric::Cosine);
    assert_eq!(config.index.max_iterations, IndexConfig::default().max_iterations);
    assert_eq!(config.chunking, ChunkingConfig::default());
    assert!(config.validate().is_ok());
}

#[test]
fn setter_validation() {
    let mut config = EmbeddingConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_batch_size(128).is_ok());
    assert!(config.set_embedding_dimension(768).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_protocol("HTTP".to_string()).is_err());
    assert!(config.set_batch_size(0).is_err());
    assert!(config.set_embedding_dimension(0).is_err());
    assert_eq!(config.batch_size, 128);
    assert_eq!(config.embedding_dimension, 768);
}

#[test]
fn load_missing_config_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("should load defaults");
    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.embedding, EmbeddingConfig::default());
    assert_eq!(
        config.database_path(),
        temp_dir.path().join("semsearch.db")
    );
}

#[test]
fn save_and_reload() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let mut config = Config {
        base_dir: temp_dir.path().join("nested"),
        ..Config::default()
    };
    config.embedding.backend = EmbeddingBackend::Hashing;
    config.index.cluster_count = 8;
    config.index.probe_count = 2;
    config.save().expect("should save config");

    let loaded = Config::load(temp_dir.path().join("nested")).expect("should reload config");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        temp_dir.path().join("config.toml"),
        "[chunking]\nchunk_size = 10\nchunk_overlap = 10\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}
