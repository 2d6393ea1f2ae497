//! Training and inference wrapper around a synthesis network.
//!
//! [`RadTtsModel`] owns the text frontend, the network, the loss module and
//! the phase gate, and exposes the hooks a training loop drives:
//! [`training_step`](RadTtsModel::training_step),
//! [`validation_step`](RadTtsModel::validation_step),
//! [`validation_epoch_end`](RadTtsModel::validation_epoch_end) and
//! [`configure_optimizers`](RadTtsModel::configure_optimizers).

use crate::config::{Config, OptimConfig, TrainConfig};
use crate::error::Result;
use crate::loss::{self, BINARIZATION_LOSS, BinarizationLoss, LossTerms, RadTtsLoss, StepLoss};
use crate::models::build_network;
use crate::optim::{self, Optimizer};
use crate::phase::{PhaseFlags, PhaseGate};
use crate::plot::plot_alignment;
use crate::text::{build_normalizer, build_tokenizer};
use crate::traits::{
    ForwardInputs, LossModule, MetricsSink, SynthesisNetwork, TextNormalizer, TextTokenizer,
};
use crate::types::{Batch, ModelOutputs, Tensor};
use ndarray::{Array1, Array2, Array3, Array4, s};

/// Label attached to the first validation batch.
pub const VALIDATION_AUDIO_LABEL: &str = "audio_1";

/// Image tag of the hard (MAS) alignment.
pub const ATTENTION_MAS_TAG: &str = "attention_weights_mas";

/// Image tag of the soft alignment.
pub const ATTENTION_SOFT_TAG: &str = "attention_weights";

/// Losses and, for the first batch, alignments of one validation step.
#[derive(Clone, Debug)]
pub struct ValidationOutput {
    /// All loss terms including `binarization_loss`.
    pub loss_terms: LossTerms,
    pub total: f32,
    /// Hard attention `(B, 1, T_mel, T_text)`, first batch only
    pub attn: Option<Array4<f32>>,
    /// Soft attention `(B, 1, T_mel, T_text)`, first batch only
    pub attn_soft: Option<Array4<f32>>,
    pub audio_path: Option<&'static str>,
}

pub struct RadTtsModel {
    network: Box<dyn SynthesisNetwork>,
    criterion: Box<dyn LossModule>,
    attention_kl_loss: BinarizationLoss,
    gate: PhaseGate,
    tokenizer: Box<dyn TextTokenizer>,
    normalizer: Option<Box<dyn TextNormalizer>>,
    optim: OptimConfig,
    finetune_layers: Vec<String>,
    training: bool,
    global_step: u64,
    log_train_images: bool,
}

impl RadTtsModel {
    /// Assemble a model from its parts. Starts in training mode at step 0.
    pub fn new(
        network: Box<dyn SynthesisNetwork>,
        criterion: Box<dyn LossModule>,
        tokenizer: Box<dyn TextTokenizer>,
        train: &TrainConfig,
        optim: OptimConfig,
    ) -> Self {
        Self {
            network,
            criterion,
            attention_kl_loss: BinarizationLoss,
            gate: train.phase_gate(),
            tokenizer,
            normalizer: None,
            optim,
            finetune_layers: train.finetune_layers.clone(),
            training: true,
            global_step: 0,
            log_train_images: false,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Box<dyn TextNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Build tokenizer, normalizer, network and loss from a config document.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let tokenizer = build_tokenizer(&config.text_tokenizer)?;
        let normalizer = build_normalizer(
            config.text_normalizer.as_ref(),
            &config.text_normalizer_call_kwargs,
        )?;
        let network = build_network(&config.model, tokenizer.vocab_size());
        let criterion = Box::new(RadTtsLoss::new(config.train.loss_weights));

        tracing::info!(
            vocab = tokenizer.vocab_size(),
            n_mel = config.model.n_mel_channels,
            n_speakers = config.model.n_speakers,
            params = network.parameters().num_trainable(),
            "model initialized"
        );

        let model = Self::new(
            network,
            criterion,
            tokenizer,
            &config.train,
            config.optim.clone(),
        );
        Ok(match normalizer {
            Some(normalizer) => model.with_normalizer(normalizer),
            None => model,
        })
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn set_global_step(&mut self, step: u64) {
        self.global_step = step;
    }

    pub fn phase_gate(&self) -> PhaseGate {
        self.gate
    }

    /// Set once the first validation epoch has logged its alignments.
    pub fn log_train_images(&self) -> bool {
        self.log_train_images
    }

    pub fn network(&self) -> &dyn SynthesisNetwork {
        self.network.as_ref()
    }

    pub fn network_mut(&mut self) -> &mut dyn SynthesisNetwork {
        self.network.as_mut()
    }

    pub fn tokenizer(&self) -> &dyn TextTokenizer {
        self.tokenizer.as_ref()
    }

    pub fn normalizer(&self) -> Option<&dyn TextNormalizer> {
        self.normalizer.as_deref()
    }

    /// Name the positional tensors of a collated batch.
    pub fn batch_dict(&self, batch: Vec<Tensor>) -> Result<Batch> {
        Batch::from_tensors(batch)
    }

    /// Forward, loss and metrics for one training batch at the current global step.
    ///
    /// Every term, including `binarization_loss`, is logged under `train/`.
    /// Gradients are not touched; call [`backward`](Self::backward) with the
    /// returned loss.
    pub fn training_step(
        &mut self,
        batch: Vec<Tensor>,
        sink: &mut dyn MetricsSink,
    ) -> Result<StepLoss> {
        let batch = self.batch_dict(batch)?;
        let flags = self.gate.flags(self.global_step);

        let outputs = self
            .network
            .forward(&ForwardInputs::from_batch(&batch, flags.binarize))?;
        let step = self.compute_loss(&batch, &outputs, flags)?;

        for (name, term) in step.terms.iter() {
            sink.log_scalar(&format!("train/{name}"), term.value, self.global_step)?;
        }

        tracing::debug!(
            step = self.global_step,
            loss = step.total,
            binarize = flags.binarize,
            kl_active = flags.kl_active,
            "training step"
        );

        Ok(step)
    }

    /// Accumulate network gradients for the loss of the last training step.
    pub fn backward(&mut self, step: &StepLoss) -> Result<()> {
        self.network.backward(&step.terms)
    }

    /// Losses for one validation batch.
    ///
    /// The network always runs with hard attention; the binarization loss
    /// follows the same phase gate as training.
    pub fn validation_step(&mut self, batch: Vec<Tensor>, batch_idx: usize) -> Result<ValidationOutput> {
        let batch = self.batch_dict(batch)?;
        let flags = self.gate.flags(self.global_step);

        let outputs = self
            .network
            .forward(&ForwardInputs::from_batch(&batch, true))?;
        let step = self.compute_loss(&batch, &outputs, flags)?;

        let first = batch_idx == 0;
        Ok(ValidationOutput {
            loss_terms: step.terms,
            total: step.total,
            attn: if first { Some(outputs.attn()?) } else { None },
            attn_soft: if first { Some(outputs.attn_soft()?) } else { None },
            audio_path: first.then_some(VALIDATION_AUDIO_LABEL),
        })
    }

    /// Log the first batch's losses under `val/` and its alignments as images.
    pub fn validation_epoch_end(
        &mut self,
        outputs: &[ValidationOutput],
        sink: &mut dyn MetricsSink,
    ) -> Result<()> {
        let Some(first) = outputs.first() else {
            tracing::warn!("validation produced no outputs");
            return Ok(());
        };

        for (name, term) in first.loss_terms.iter() {
            if name != BINARIZATION_LOSS {
                sink.log_scalar(&format!("val/{name}"), term.value, self.global_step)?;
            }
        }

        for (tag, attn) in [
            (ATTENTION_MAS_TAG, &first.attn),
            (ATTENTION_SOFT_TAG, &first.attn_soft),
        ] {
            match attn {
                Some(attn) => {
                    // (T_mel, T_text) -> (T_text, T_mel)
                    let image = plot_alignment(attn.slice(s![0, 0, .., ..]).reversed_axes())?;
                    sink.log_image(tag, &image, self.global_step)?;
                }
                None => tracing::warn!(tag, "first validation output has no alignment"),
            }
        }

        self.log_train_images = true;
        Ok(())
    }

    /// Select the configured optimizer, freezing non fine-tuned parameters.
    pub fn configure_optimizers(&mut self) -> Result<Box<dyn Optimizer>> {
        optim::configure_optimizer(
            &self.optim,
            &self.finetune_layers,
            self.network.parameters_mut(),
        )
    }

    /// Synthesize mel-spectrograms `(B, n_mel, T)` from token ids `(B, T_text)`.
    ///
    /// Switches the model to eval mode. The usual call is `speaker = 0`,
    /// `sigma = 1.0`.
    pub fn generate_spectrogram(
        &mut self,
        tokens: &Array2<i64>,
        speaker: i64,
        sigma: f32,
    ) -> Result<Array3<f32>> {
        if self.training {
            tracing::warn!("generate_spectrogram() is meant to be called in eval mode.");
        }
        self.eval();

        let speaker = Array1::from_elem(tokens.nrows(), speaker);
        let outputs = self.network.infer(&speaker, tokens, sigma)?;
        outputs.mel()
    }

    /// Tokenize `text` into a `(1, T)` id array, normalizing it first when
    /// requested and a normalizer is configured.
    pub fn parse(&self, text: &str, normalize: bool) -> Result<Array2<i64>> {
        if self.training {
            tracing::warn!("parse() is meant to be called in eval mode.");
        }

        let ids = match (&self.normalizer, normalize) {
            (Some(normalizer), true) => self.tokenizer.encode(&normalizer.normalize(text))?,
            _ => self.tokenizer.encode(text)?,
        };
        let len = ids.len();
        Ok(Array2::from_shape_vec((1, len), ids)?)
    }

    fn compute_loss(
        &self,
        batch: &Batch,
        outputs: &ModelOutputs,
        flags: PhaseFlags,
    ) -> Result<StepLoss> {
        let terms = self
            .criterion
            .compute(outputs, &batch.text_lens, &batch.log_mel_lens)?;
        loss::assemble(terms, outputs, flags, &self.attention_kl_loss)
    }
}
