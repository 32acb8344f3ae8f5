use burn::config::Config;

use crate::{config::BiFormerConfig, error::BiFormerError, models::modules::NormLayer};

#[test]
fn default_configuration_is_valid() {
    let config = BiFormerConfig::new();

    assert!(config.validate().is_ok());
    assert_eq!(config.num_heads(), [3, 6, 12, 24]);
    assert_eq!(config.norm_layer, NormLayer::LayerNorm2d);
}

#[test]
fn stl_preset_matches_published_model() {
    let config = BiFormerConfig::biformer_stl_nchw();

    assert!(config.validate().is_ok());
    assert_eq!(config.depth, [2, 2, 6, 2]);
    assert_eq!(config.embed_dim, [96, 192, 384, 768]);
    assert_eq!(config.norm_layer, NormLayer::BatchNorm2d);
    assert_eq!(config.topks, [1, 4, 16, -1]);
    assert_eq!(config.n_wins, [7; 4]);
}

#[test]
fn invalid_topk_is_reported() {
    let config = BiFormerConfig::new().with_topks([1, 4, 16, -2]);

    match config.validate() {
        Err(BiFormerError::InvalidTopk { topk }) => assert_eq!(topk, -2),
        other => panic!("Expected InvalidTopk error, got {other:?}"),
    }
}

#[test]
fn width_must_divide_into_heads() {
    let config = BiFormerConfig::new().with_embed_dim([96, 192, 384, 770]);

    match config.validate() {
        Err(BiFormerError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("embed_dim[3]"));
        }
        other => panic!("Expected InvalidConfiguration error, got {other:?}"),
    }
}

#[test]
fn topk_cannot_exceed_region_count() {
    let config = BiFormerConfig::new()
        .with_n_wins([7, 7, 2, 7])
        .with_topks([1, 4, 16, -1]);

    match config.validate() {
        Err(BiFormerError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("topks[2]"));
        }
        other => panic!("Expected InvalidConfiguration error, got {other:?}"),
    }
}

#[test]
fn rejects_out_of_range_settings() {
    let cases = [
        BiFormerConfig::new().with_head_dim(0),
        BiFormerConfig::new().with_in_channels(0),
        BiFormerConfig::new().with_n_wins([7, 0, 7, 7]),
        BiFormerConfig::new().with_mlp_ratios([4.0, 0.0, 4.0, 4.0]),
        BiFormerConfig::new().with_use_checkpoint_stages(vec![0, 4]),
        BiFormerConfig::new().with_drop_path_rate(1.0),
        BiFormerConfig::new().with_drop_rate(-0.1),
    ];

    for config in cases {
        assert!(
            matches!(config.validate(), Err(BiFormerError::InvalidConfiguration { .. })),
            "{config}"
        );
    }
}

#[test]
fn init_runs_validation() {
    let device = Default::default();
    let result = BiFormerConfig::new()
        .with_topks([0, 4, 16, -1])
        .init::<burn::backend::NdArray<f32>>(&device);

    assert!(matches!(result, Err(BiFormerError::InvalidTopk { topk: 0 })));
}

#[test]
fn config_round_trips_through_json() {
    let config = BiFormerConfig::biformer_stl_nchw().with_use_checkpoint_stages(vec![2]);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("biformer.json");

    config.save(&path).unwrap();
    let loaded = BiFormerConfig::load(&path).unwrap();

    assert_eq!(loaded.norm_layer, NormLayer::BatchNorm2d);
    assert_eq!(loaded.use_checkpoint_stages, vec![2]);
    assert_eq!(loaded.topks, config.topks);
}
