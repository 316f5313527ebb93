//! Random parameter initialisation for encoder models

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::params::ParamTree;
use crate::tensor::Tensor;

/// Create a randomly initialised parameter tree for `config`.
///
/// The same seed always yields the same tree. Kernels are stored
/// `[in_features, out_features]`; LayerNorm scales start at one and
/// biases at zero.
pub fn init_params(config: &ModelConfig, seed: u64) -> Result<ParamTree> {
    config.validate()?;

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let range = config.initializer_range;
    let hidden = config.hidden_size;
    let inter = config.intermediate_size;
    // Projections span every head; validate() guarantees this equals hidden
    let all_heads = config.num_attention_heads * config.head_dim();

    let mut random = |shape: Vec<usize>| -> Result<Tensor> {
        let numel: usize = shape.iter().product();
        let data: Vec<f32> = (0..numel).map(|_| rng.gen_range(-range..range)).collect();
        Tensor::new(shape, data)
    };

    let mut tree = ParamTree::new();

    tree.insert(
        "embeddings.word_embeddings.embedding",
        random(vec![config.vocab_size, hidden])?,
    )?;
    tree.insert(
        "embeddings.position_embeddings.embedding",
        random(vec![config.max_position_embeddings, hidden])?,
    )?;
    tree.insert(
        "embeddings.token_type_embeddings.embedding",
        random(vec![config.type_vocab_size, hidden])?,
    )?;
    insert_layer_norm(&mut tree, "embeddings.LayerNorm", hidden)?;

    for i in 0..config.num_hidden_layers {
        let prefix = format!("encoder.layer.{i}");

        for proj in ["query", "key", "value"] {
            tree.insert(
                &format!("{prefix}.attention.self.{proj}.kernel"),
                random(vec![hidden, all_heads])?,
            )?;
            tree.insert(
                &format!("{prefix}.attention.self.{proj}.bias"),
                Tensor::zeros(vec![all_heads]),
            )?;
        }

        tree.insert(
            &format!("{prefix}.attention.output.dense.kernel"),
            random(vec![all_heads, hidden])?,
        )?;
        tree.insert(
            &format!("{prefix}.attention.output.dense.bias"),
            Tensor::zeros(vec![hidden]),
        )?;
        insert_layer_norm(&mut tree, &format!("{prefix}.attention.output.LayerNorm"), hidden)?;

        tree.insert(
            &format!("{prefix}.intermediate.dense.kernel"),
            random(vec![hidden, inter])?,
        )?;
        tree.insert(
            &format!("{prefix}.intermediate.dense.bias"),
            Tensor::zeros(vec![inter]),
        )?;

        tree.insert(
            &format!("{prefix}.output.dense.kernel"),
            random(vec![inter, hidden])?,
        )?;
        tree.insert(
            &format!("{prefix}.output.dense.bias"),
            Tensor::zeros(vec![hidden]),
        )?;
        insert_layer_norm(&mut tree, &format!("{prefix}.output.LayerNorm"), hidden)?;
    }

    tree.insert("pooler.dense.kernel", random(vec![hidden, hidden])?)?;
    tree.insert("pooler.dense.bias", Tensor::zeros(vec![hidden]))?;

    tracing::debug!(
        tensors = tree.len(),
        parameters = tree.num_parameters(),
        "initialised random parameters"
    );

    Ok(tree)
}

fn insert_layer_norm(tree: &mut ParamTree, prefix: &str, hidden: usize) -> Result<()> {
    tree.insert(&format!("{prefix}.scale"), Tensor::ones(vec![hidden]))?;
    tree.insert(&format!("{prefix}.bias"), Tensor::zeros(vec![hidden]))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiny_model_layout() {
        let config = ModelConfig::tiny();
        let params = init_params(&config, 0).unwrap();

        // 3 embeddings + 2 LN, 16 per layer, 2 pooler
        assert_eq!(params.len(), 5 + config.num_hidden_layers * 16 + 2);

        let word = params.get("embeddings.word_embeddings.embedding").unwrap();
        assert_eq!(word.shape(), &[99, 32]);

        let up = params.get("encoder.layer.4.intermediate.dense.kernel").unwrap();
        assert_eq!(up.shape(), &[32, 37]);

        let query = params.get("encoder.layer.0.attention.self.query.kernel").unwrap();
        assert_eq!(
            query.shape(),
            &[config.hidden_size, config.num_attention_heads * config.head_dim()]
        );

        let scale = params.get("encoder.layer.0.output.LayerNorm.scale").unwrap();
        assert!(scale.data().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_seeded_init_is_deterministic() {
        let config = ModelConfig::tiny();
        let a = init_params(&config, 7).unwrap();
        let b = init_params(&config, 7).unwrap();
        let c = init_params(&config, 8).unwrap();

        assert_eq!(a, b);
        assert!(!a.approx_eq(&c, 1e-4));
    }
}
