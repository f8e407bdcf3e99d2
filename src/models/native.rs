use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use encoding_rs::UTF_8;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaChatTemplate, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::DecodeError;
use once_cell::sync::OnceCell;

use crate::engine::TranslationEngine;
use crate::ir::LanguageCode;
use crate::pipeline::prompts::render_template;
use crate::pipeline::LlamaSettings;
use crate::textutil::lang_label;

static LLAMA_BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

fn llama_backend() -> anyhow::Result<&'static LlamaBackend> {
    LLAMA_BACKEND.get_or_try_init(|| LlamaBackend::init().context("init llama backend"))
}

#[derive(Clone, Debug)]
pub struct NativeModelConfig {
    pub name: String,
    pub model_path: PathBuf,
    pub template_hint: Option<String>,
    pub ctx_size: u32,
    pub threads: i32,
    pub gpu_layers: i32,
}

pub struct NativeChatModel {
    pub name: String,
    pub model_path: PathBuf,
    pub ctx_size: u32,
    model: Option<Box<LlamaModel>>,
    ctx: Option<LlamaContext<'static>>,
    template: LlamaChatTemplate,
}

// SAFETY: a model is only ever touched through `LlamaEngine::models`, whose mutex
// serialises every call into llama.cpp.
unsafe impl Send for NativeChatModel {}

impl NativeChatModel {
    pub fn load(backend: &LlamaBackend, cfg: NativeModelConfig) -> anyhow::Result<Self> {
        if !cfg.model_path.exists() {
            return Err(anyhow!(
                "{} model not found: {}",
                cfg.name,
                cfg.model_path.display()
            ));
        }

        let mut model_params = LlamaModelParams::default();
        if cfg.gpu_layers == -1 {
            model_params = model_params.with_n_gpu_layers(9999);
        } else if cfg.gpu_layers >= 0 {
            model_params = model_params.with_n_gpu_layers(cfg.gpu_layers as u32);
        }

        let model = Box::new(
            LlamaModel::load_from_file(backend, &cfg.model_path, &model_params)
                .with_context(|| format!("load model {}", cfg.model_path.display()))?,
        );
        // `LlamaContext` borrows `LlamaModel`; the model is boxed (stable address) and the
        // context is dropped first in `Drop`.
        let model_ptr: *const LlamaModel = &*model;
        let model_ref: &'static LlamaModel = unsafe { &*model_ptr };

        let ctx_train = model_ref.n_ctx_train();
        let mut ctx_size = cfg.ctx_size;
        if ctx_size == 0 {
            ctx_size = ctx_train.max(2048);
        }
        if ctx_train > 0 && ctx_size > ctx_train {
            ctx_size = ctx_train;
        }
        ctx_size = ctx_size.max(256);

        let mut ctx_params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(ctx_size));
        if cfg.threads > 0 {
            ctx_params = ctx_params
                .with_n_threads(cfg.threads)
                .with_n_threads_batch(cfg.threads);
        }
        let ctx = model_ref
            .new_context(backend, ctx_params)
            .context("create model context")?;

        let template = match model_ref.chat_template(None) {
            Ok(t) => t,
            Err(_) => {
                let hint = cfg.template_hint.as_deref().unwrap_or("chatml");
                LlamaChatTemplate::new(hint).context("build fallback chat template")?
            }
        };

        Ok(Self {
            name: cfg.name,
            model_path: cfg.model_path,
            ctx_size,
            model: Some(model),
            ctx: Some(ctx),
            template,
        })
    }

    /// Greedy single-turn completion.
    pub fn chat(&mut self, user_prompt: &str, max_tokens: u32) -> anyhow::Result<String> {
        let chat = vec![LlamaChatMessage::new("user".to_string(), user_prompt.to_string())
            .context("build user message")?];
        let prompt = self
            .model_ref()?
            .apply_chat_template(&self.template, &chat, true)
            .context("apply chat template")?;
        self.generate_from_prompt(&prompt, max_tokens)
    }

    fn generate_from_prompt(&mut self, prompt: &str, max_tokens: u32) -> anyhow::Result<String> {
        self.ctx_mut()?.clear_kv_cache();

        let prompt_tokens = self
            .model_ref()?
            .str_to_token(prompt, decide_add_bos(prompt))
            .context("tokenize prompt")?;
        if prompt_tokens.is_empty() {
            return Err(anyhow!("empty prompt tokens"));
        }

        let n_ctx = self.ctx_ref()?.n_ctx() as usize;
        let available = n_ctx.saturating_sub(prompt_tokens.len() + 1);
        if available == 0 {
            return Err(anyhow!(
                "prompt_too_long: prompt_tokens={} n_ctx={}",
                prompt_tokens.len(),
                n_ctx
            ));
        }
        let max_tokens = (max_tokens as usize).min(available);

        let n_batch = self.ctx_ref()?.n_batch() as usize;
        if n_batch == 0 {
            return Err(anyhow!("invalid n_batch=0"));
        }

        let last_index = prompt_tokens.len() - 1;
        let mut chunk_start = 0;
        while chunk_start < prompt_tokens.len() {
            let chunk_end = (chunk_start + n_batch).min(prompt_tokens.len());
            let chunk = &prompt_tokens[chunk_start..chunk_end];

            let mut batch = LlamaBatch::new(chunk.len().max(512), 1);
            for (i, token) in chunk.iter().copied().enumerate() {
                let pos = (chunk_start + i) as i32;
                batch
                    .add(token, pos, &[0], chunk_start + i == last_index)
                    .context("batch.add(prompt)")?;
            }
            self.decode_checked(&mut batch, "decode prompt")?;
            chunk_start = chunk_end;
        }

        let mut sampler = LlamaSampler::greedy();

        let mut decoder = UTF_8.new_decoder();
        let mut out = String::new();
        let mut batch = LlamaBatch::new(512, 1);
        let mut n_cur = prompt_tokens.len() as i32;
        for _ in 0..max_tokens {
            let token = sampler.sample(self.ctx_ref()?, -1);
            if self.model_ref()?.is_eog_token(token) {
                break;
            }
            let bytes = self
                .model_ref()?
                .token_to_bytes(token, Special::Tokenize)
                .context("token_to_bytes")?;
            let mut piece = String::with_capacity(32);
            let _ = decoder.decode_to_string(&bytes, &mut piece, false);
            out.push_str(&piece);

            batch.clear();
            batch.add(token, n_cur, &[0], true).context("batch.add(gen)")?;
            n_cur += 1;
            self.decode_checked(&mut batch, "decode(gen)")?;
        }
        let mut tail = String::new();
        let _ = decoder.decode_to_string(&[], &mut tail, true);
        out.push_str(&tail);

        Ok(out.trim().to_string())
    }

    fn decode_checked(&mut self, batch: &mut LlamaBatch, stage: &str) -> anyhow::Result<()> {
        let name = self.name.clone();
        self.ctx_mut()?.decode(batch).map_err(|err| match err {
            DecodeError::Unknown(-2) => anyhow!(
                "llama_decode threw a foreign exception (likely OOM) (model={name}, stage={stage})"
            ),
            other => anyhow!(other),
        })
    }

    fn model_ref(&self) -> anyhow::Result<&'static LlamaModel> {
        Ok(self.ctx_ref()?.model)
    }

    fn ctx_ref(&self) -> anyhow::Result<&LlamaContext<'static>> {
        self.ctx
            .as_ref()
            .ok_or_else(|| anyhow!("{} context missing", self.name))
    }

    fn ctx_mut(&mut self) -> anyhow::Result<&mut LlamaContext<'static>> {
        let name = self.name.clone();
        self.ctx
            .as_mut()
            .ok_or_else(|| anyhow!("{name} context missing"))
    }
}

impl Drop for NativeChatModel {
    fn drop(&mut self) {
        let _ = self.ctx.take();
        let _ = self.model.take();
    }
}

fn decide_add_bos(prompt: &str) -> AddBos {
    let p = prompt.trim_start();
    if p.starts_with("<s>")
        || p.starts_with("<|begin_of_text|>")
        || p.starts_with("<bos>")
        || p.starts_with("<|startoftext|>")
    {
        AddBos::Never
    } else {
        AddBos::Always
    }
}

/// Local GGUF translation, one model per direction (a shared bilingual file is loaded once).
pub struct LlamaEngine {
    settings: LlamaSettings,
    models: Mutex<HashMap<PathBuf, NativeChatModel>>,
}

impl LlamaEngine {
    pub fn new(settings: LlamaSettings) -> anyhow::Result<Self> {
        llama_backend()?;
        Ok(Self {
            settings,
            models: Mutex::new(HashMap::new()),
        })
    }

    fn model_path(&self, src: LanguageCode, tgt: LanguageCode) -> anyhow::Result<&Path> {
        self.settings
            .pairs
            .iter()
            .find(|p| p.src == src && p.tgt == tgt)
            .map(|p| p.path.as_path())
            .ok_or_else(|| anyhow!("no model configured for {src} -> {tgt}"))
    }
}

impl TranslationEngine for LlamaEngine {
    fn translate(
        &self,
        text: &str,
        src: LanguageCode,
        tgt: LanguageCode,
    ) -> anyhow::Result<String> {
        let (lead, core, trail) = split_outer_whitespace(text);
        if core.is_empty() {
            return Ok(text.to_string());
        }
        let path = self.model_path(src, tgt)?.to_path_buf();

        let mut models = self.models.lock().unwrap_or_else(|e| e.into_inner());
        if !models.contains_key(&path) {
            let model = NativeChatModel::load(
                llama_backend()?,
                NativeModelConfig {
                    name: format!("{src}->{tgt}"),
                    model_path: path.clone(),
                    template_hint: self.settings.template_hint.clone(),
                    ctx_size: self.settings.ctx_size,
                    threads: self.settings.threads,
                    gpu_layers: self.settings.gpu_layers,
                },
            )?;
            models.insert(path.clone(), model);
        }
        let model = models
            .get_mut(&path)
            .ok_or_else(|| anyhow!("model cache miss: {}", path.display()))?;

        let prompt = render_template(
            &self.settings.prompt,
            &[
                ("source_lang", lang_label(src)),
                ("target_lang", lang_label(tgt)),
                ("text", core),
            ],
        );
        let raw = model.chat(&prompt, self.settings.max_tokens)?;
        let cleaned = cleanup_model_text(&raw);
        if cleaned.is_empty() {
            return Err(anyhow!("model returned empty output"));
        }
        Ok(format!("{lead}{cleaned}{trail}"))
    }

    fn name(&self) -> &str {
        "llama.cpp"
    }
}

/// Splits `text` into (leading whitespace, core, trailing whitespace).
fn split_outer_whitespace(text: &str) -> (&str, &str, &str) {
    let start = text.len() - text.trim_start().len();
    let end = text.trim_end().len().max(start);
    (&text[..start], &text[start..end], &text[end..])
}

fn cleanup_model_text(text: &str) -> String {
    let mut s = text.trim().to_string();
    if s.starts_with("```") {
        if let Some(i) = s.find('\n') {
            s = s[i + 1..].to_string();
        }
        if let Some(end) = s.rfind("```") {
            s = s[..end].to_string();
        }
    }
    s.trim().trim_matches('"').trim().to_string()
}
