//! ggml "starcoder" model file loader.
//!
//! # Format
//! ```text
//! [u32 magic = 0x67676d6c]
//! [i32 n_vocab, n_ctx, n_embd, n_head, n_layer, ftype]
//! [i32 count] then count × [u32 len][len bytes]        vocabulary, id = index
//! repeated until EOF:
//!   [i32 n_dims][i32 name_len][i32 ttype][i32 × n_dims dims][name][data]
//! ```
//! All integers are little-endian. Tensor data is indexed, not copied: the
//! [`WeightIndex`] keeps the memory map alive and hands out byte slices.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use starcoder_engine::{Hyperparameters, TokenId};
use starcoder_tokenizer::Vocabulary;

use crate::error::LoadError;
use crate::mmap::MappedFile;

/// `"ggml"` read as a little-endian u32.
pub const GGML_MAGIC: u32 = 0x6767_6d6c;

/// The stored ftype carries the quantization version in its thousands.
pub const QNT_VERSION_FACTOR: i32 = 1000;

/// Chat-format markers registered as special tokens when the vocabulary has them.
pub const STARCHAT_SPECIAL_TOKENS: [&str; 4] =
    ["<|system|>", "<|user|>", "<|assistant|>", "<|end|>"];

/// Elements per block of the block-quantized types.
const QK: usize = 32;

/// Storage type of one tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GgmlType {
    F32,
    F16,
    Q4_0,
    Q4_1,
    Q5_0,
    Q5_1,
    Q8_0,
}

impl GgmlType {
    pub fn from_i32(ttype: i32) -> Option<Self> {
        Some(match ttype {
            0 => Self::F32,
            1 => Self::F16,
            2 => Self::Q4_0,
            3 => Self::Q4_1,
            6 => Self::Q5_0,
            7 => Self::Q5_1,
            8 => Self::Q8_0,
            _ => return None,
        })
    }

    /// Bytes needed for `n_elements` values, or `None` if the count does not
    /// fill whole quantization blocks.
    pub fn byte_size(self, n_elements: usize) -> Option<usize> {
        let block_bytes = match self {
            Self::F32 => return n_elements.checked_mul(4),
            Self::F16 => return n_elements.checked_mul(2),
            Self::Q4_0 => 18,
            Self::Q4_1 => 20,
            Self::Q5_0 => 22,
            Self::Q5_1 => 24,
            Self::Q8_0 => 34,
        };
        if n_elements % QK != 0 {
            return None;
        }
        (n_elements / QK).checked_mul(block_bytes)
    }
}

/// Location and shape of one tensor inside the mapped file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    pub dims: Vec<usize>,
    pub ttype: GgmlType,
    pub offset: usize,
    pub len: usize,
}

impl TensorInfo {
    pub fn n_elements(&self) -> usize {
        self.dims.iter().product()
    }
}

/// Named tensors over a live memory map.
#[derive(Debug)]
pub struct WeightIndex {
    tensors: HashMap<String, TensorInfo>,
    order: Vec<String>,
    file: MappedFile,
}

impl WeightIndex {
    pub fn get(&self, name: &str) -> Option<&TensorInfo> {
        self.tensors.get(name)
    }

    /// Raw bytes of a tensor.
    pub fn data(&self, name: &str) -> Option<&[u8]> {
        let info = self.tensors.get(name)?;
        self.file.slice(info.offset, info.len)
    }

    /// Tensor names in file order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Sum of all tensor data sizes in bytes.
    pub fn total_bytes(&self) -> usize {
        self.tensors.values().map(|t| t.len).sum()
    }
}

/// Everything read from a model file.
#[derive(Debug)]
pub struct LoadedModel {
    pub hparams: Hyperparameters,
    pub vocab: Vocabulary,
    pub weights: WeightIndex,
}

/// Load a ggml starcoder model file.
pub fn load(path: &Path) -> Result<LoadedModel, LoadError> {
    tracing::info!(path = %path.display(), "loading model");
    let file = MappedFile::open(path)?;
    let model = parse(file)?;
    tracing::info!(
        n_vocab = model.hparams.n_vocab,
        n_ctx = model.hparams.n_ctx,
        n_embd = model.hparams.n_embd,
        n_head = model.hparams.n_head,
        n_layer = model.hparams.n_layer,
        ftype = model.hparams.ftype,
        tensors = model.weights.len(),
        weight_mb = model.weights.total_bytes() as f64 / (1024.0 * 1024.0),
        "model loaded"
    );
    Ok(model)
}

/// Parse an already mapped file.
pub fn parse(file: MappedFile) -> Result<LoadedModel, LoadError> {
    let (hparams, vocab, tensors, order) = {
        let mut cur = Cursor::new(file.as_bytes());

        let magic = read_u32(&mut cur, "magic")?;
        if magic != GGML_MAGIC {
            return Err(LoadError::BadMagic(magic));
        }

        let hparams = read_hparams(&mut cur)?;
        let vocab = read_vocab(&mut cur, hparams.n_vocab)?;
        let (tensors, order) = read_tensors(&mut cur)?;
        (hparams, vocab, tensors, order)
    };

    Ok(LoadedModel {
        hparams,
        vocab,
        weights: WeightIndex {
            tensors,
            order,
            file,
        },
    })
}

fn read_u32(cur: &mut Cursor<&[u8]>, what: &str) -> Result<u32, LoadError> {
    cur.read_u32::<LittleEndian>()
        .map_err(|_| LoadError::Truncated(what.to_string()))
}

fn read_i32(cur: &mut Cursor<&[u8]>, what: &str) -> Result<i32, LoadError> {
    cur.read_i32::<LittleEndian>()
        .map_err(|_| LoadError::Truncated(what.to_string()))
}

fn read_bytes<'a>(
    cur: &mut Cursor<&'a [u8]>,
    len: usize,
    what: &str,
) -> Result<&'a [u8], LoadError> {
    let data: &'a [u8] = *cur.get_ref();
    let start = cur.position() as usize;
    let bytes = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| LoadError::Truncated(what.to_string()))?;
    cur.set_position((start + len) as u64);
    Ok(bytes)
}

fn positive(name: &'static str, value: i32) -> Result<usize, LoadError> {
    if value > 0 {
        Ok(value as usize)
    } else {
        Err(LoadError::InvalidHyperparameter { name, value })
    }
}

fn read_hparams(cur: &mut Cursor<&[u8]>) -> Result<Hyperparameters, LoadError> {
    let n_vocab = positive("n_vocab", read_i32(cur, "n_vocab")?)?;
    let n_ctx = positive("n_ctx", read_i32(cur, "n_ctx")?)?;
    let n_embd = positive("n_embd", read_i32(cur, "n_embd")?)?;
    let n_head = positive("n_head", read_i32(cur, "n_head")?)?;
    let n_layer = positive("n_layer", read_i32(cur, "n_layer")?)?;
    let ftype = read_i32(cur, "ftype")?;
    if ftype < 0 {
        return Err(LoadError::InvalidHyperparameter {
            name: "ftype",
            value: ftype,
        });
    }

    let qnt_version = ftype / QNT_VERSION_FACTOR;
    let ftype = (ftype % QNT_VERSION_FACTOR) as u32;
    tracing::debug!(qnt_version, ftype, "read hyperparameters");

    Ok(Hyperparameters {
        n_vocab,
        n_ctx,
        n_embd,
        n_head,
        n_layer,
        ftype,
    })
}

fn read_vocab(cur: &mut Cursor<&[u8]>, n_vocab: usize) -> Result<Vocabulary, LoadError> {
    let count = read_i32(cur, "vocabulary size")?;
    if i64::from(count) != n_vocab as i64 {
        return Err(LoadError::VocabMismatch {
            expected: n_vocab,
            found: i64::from(count),
        });
    }

    let mut vocab = Vocabulary::new();
    for id in 0..n_vocab {
        let len = read_u32(cur, "vocabulary entry length")? as usize;
        let fragment = read_bytes(cur, len, "vocabulary entry")?;
        vocab.insert(id as TokenId, fragment);
    }

    for special in STARCHAT_SPECIAL_TOKENS {
        if vocab.add_special_token(special) {
            tracing::debug!(token = special, "registered special token");
        }
    }
    Ok(vocab)
}

type TensorTable = (HashMap<String, TensorInfo>, Vec<String>);

fn read_tensors(cur: &mut Cursor<&[u8]>) -> Result<TensorTable, LoadError> {
    let mut tensors = HashMap::new();
    let mut order = Vec::new();
    let end = cur.get_ref().len() as u64;

    while cur.position() < end {
        let n_dims = read_i32(cur, "tensor header")?;
        let name_len = read_i32(cur, "tensor header")?;
        let ttype = read_i32(cur, "tensor header")?;

        if !(1..=4).contains(&n_dims) || name_len <= 0 {
            return Err(LoadError::BadTensor {
                name: format!("#{}", order.len()),
                reason: format!("n_dims = {n_dims}, name length = {name_len}"),
            });
        }

        let mut dims = Vec::with_capacity(n_dims as usize);
        for _ in 0..n_dims {
            let dim = read_i32(cur, "tensor dims")?;
            dims.push(usize::try_from(dim).unwrap_or(0));
        }

        let name_bytes = read_bytes(cur, name_len as usize, "tensor name")?;
        let name = String::from_utf8_lossy(name_bytes).into_owned();

        let ttype = GgmlType::from_i32(ttype).ok_or_else(|| LoadError::UnknownTensorType {
            name: name.clone(),
            ttype,
        })?;
        let n_elements = dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
        let len = n_elements
            .filter(|&n| n > 0)
            .and_then(|n| ttype.byte_size(n))
            .ok_or_else(|| LoadError::BadTensor {
                name: name.clone(),
                reason: format!("dims {dims:?} do not fit type {ttype:?}"),
            })?;

        let offset = cur.position() as usize;
        read_bytes(cur, len, &format!("tensor '{name}' data"))?;

        tracing::trace!(%name, ?dims, ?ttype, len, "indexed tensor");
        if tensors
            .insert(name.clone(), TensorInfo { dims, ttype, offset, len })
            .is_some()
        {
            return Err(LoadError::BadTensor {
                name,
                reason: "duplicate tensor name".to_string(),
            });
        }
        order.push(name);
    }

    Ok((tensors, order))
}
