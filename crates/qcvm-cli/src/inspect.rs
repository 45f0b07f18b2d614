//! Image summaries for `qcvm inspect`.

use std::fmt::Write as _;

use qcvm_image::{DefType, Header, Image};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Serialize)]
pub struct FunctionSummary {
    pub index: usize,
    pub name: String,
    pub file: String,
    /// `"bytecode"`, `"builtin"` (resolved by name) or `"builtin #N"`.
    pub kind: String,
    pub first_statement: i32,
    pub parm_sizes: Vec<u8>,
    pub num_locals: i32,
}

#[derive(Debug, Serialize)]
pub struct DefSummary {
    pub name: String,
    pub offset: u16,
    #[serde(rename = "type")]
    pub ty: Option<DefType>,
    pub saved: bool,
}

#[derive(Debug, Serialize)]
pub struct ImageSummary {
    pub sha256: String,
    pub size: usize,
    pub header: Header,
    pub functions: Vec<FunctionSummary>,
    pub globals: Vec<DefSummary>,
    pub fields: Vec<DefSummary>,
}

impl ImageSummary {
    pub fn new(bytes: &[u8], image: &Image) -> Self {
        let functions = image
            .functions
            .iter()
            .enumerate()
            .skip(1)
            .map(|(index, f)| FunctionSummary {
                index,
                name: image.string_lossy(f.name).into_owned(),
                file: image.string_lossy(f.file).into_owned(),
                kind: match (f.has_body(), f.builtin_index()) {
                    (true, _) => "bytecode".to_string(),
                    (false, Some(n)) => format!("builtin #{n}"),
                    (false, None) => "builtin".to_string(),
                },
                first_statement: f.first_statement,
                parm_sizes: f.parm_widths().to_vec(),
                num_locals: f.num_locals,
            })
            .collect();

        let defs = |defs: &[qcvm_image::Def]| -> Vec<DefSummary> {
            defs.iter()
                .skip(1)
                .map(|d| DefSummary {
                    name: image.string_lossy(d.name).into_owned(),
                    offset: d.offset,
                    ty: d.def_type(),
                    saved: d.is_saved(),
                })
                .collect()
        };

        Self {
            sha256: format!("{:x}", Sha256::digest(bytes)),
            size: bytes.len(),
            header: image.header,
            functions,
            globals: defs(&image.global_defs),
            fields: defs(&image.field_defs),
        }
    }

    /// Human-readable report.
    pub fn render(&self) -> String {
        let h = &self.header;
        let mut out = String::new();
        let _ = writeln!(out, "sha256      {}", self.sha256);
        let _ = writeln!(out, "size        {} bytes", self.size);
        let _ = writeln!(out, "version     {}  crc {:#06x}", h.version, h.crc);
        let _ = writeln!(out, "statements  {}", h.num_statements);
        let _ = writeln!(out, "globals     {}", h.num_globals);
        let _ = writeln!(out, "strings     {} bytes", h.len_strings);
        let _ = writeln!(
            out,
            "entity      {} fields ({} bytes)",
            h.entity_fields,
            h.entity_fields * 4
        );

        let _ = writeln!(out, "\nfunctions ({})", self.functions.len());
        for f in &self.functions {
            let _ = writeln!(
                out,
                "  {:>4}  {:<24} {:<12} parms {:?}",
                f.index, f.name, f.kind, f.parm_sizes
            );
        }

        let _ = writeln!(out, "\nfields ({})", self.fields.len());
        for d in &self.fields {
            let _ = writeln!(out, "  {:>4}  {:<24} {}", d.offset, d.name, type_name(d.ty));
        }

        let _ = writeln!(out, "\nglobals ({})", self.globals.len());
        for d in &self.globals {
            let saved = if d.saved { " (saved)" } else { "" };
            let _ = writeln!(
                out,
                "  {:>4}  {:<24} {}{saved}",
                d.offset,
                d.name,
                type_name(d.ty)
            );
        }
        out
    }
}

fn type_name(ty: Option<DefType>) -> &'static str {
    match ty {
        Some(DefType::Void) => "void",
        Some(DefType::String) => "string",
        Some(DefType::Float) => "float",
        Some(DefType::Vector) => "vector",
        Some(DefType::Entity) => "entity",
        Some(DefType::Field) => "field",
        Some(DefType::Function) => "function",
        Some(DefType::Pointer) => "pointer",
        None => "?",
    }
}

#[cfg(test)]
mod tests {
    use qcvm_image::{ImageBuilder, Opcode};

    use super::*;

    fn sample() -> Vec<u8> {
        let mut b = ImageBuilder::new();
        b.field("origin", DefType::Vector);
        b.builtin("print", &[1]);
        b.builtin_at("spawn", 13, &[]);
        b.function("main", &[1, 3]);
        b.emit(Opcode::Done, 0, 0, 0);
        b.end_function();
        b.build()
    }

    #[test]
    fn summary_lists_tables() {
        let bytes = sample();
        let image = Image::parse(&bytes).unwrap();
        let summary = ImageSummary::new(&bytes, &image);

        assert_eq!(summary.sha256.len(), 64);
        assert_eq!(summary.size, bytes.len());
        let kinds: Vec<_> = summary.functions.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(kinds, ["builtin", "builtin #13", "bytecode"]);
        assert_eq!(summary.functions[2].parm_sizes, vec![1, 3]);
        assert_eq!(summary.fields[0].name, "origin");
        assert_eq!(summary.fields[0].ty, Some(DefType::Vector));
    }

    #[test]
    fn json_and_text_render() {
        let bytes = sample();
        let image = Image::parse(&bytes).unwrap();
        let summary = ImageSummary::new(&bytes, &image);

        let json: serde_json::Value = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["header"]["version"], 6);
        assert_eq!(json["fields"][0]["type"], "vector");
        assert_eq!(json["functions"][2]["name"], "main");

        let text = summary.render();
        assert!(text.contains("main"));
        assert!(text.contains(&summary.sha256));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let bytes = sample();
        let image = Image::parse(&bytes).unwrap();
        let mut other = bytes.clone();
        other[4] ^= 1;
        assert_ne!(
            ImageSummary::new(&bytes, &image).sha256,
            ImageSummary::new(&other, &image).sha256
        );
    }
}
