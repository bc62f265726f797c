//! `dicom-index tag` command - Attribute lookups through the tag cache

use console::style;
use miette::Result;

use crate::cli::args::{GlobalOpts, OutputFormat};
use crate::cli::helpers::open_database;
use crate::core::Tag;

#[derive(clap::Args, Debug)]
pub struct TagArgs {
    /// SOPInstanceUID (or file path with --file)
    pub instance: String,

    /// Tags to show as gggg,eeee (all attributes when omitted)
    pub tags: Vec<Tag>,

    /// Treat INSTANCE as a file path
    #[arg(long)]
    pub file: bool,
}

pub fn run(args: TagArgs, global: &GlobalOpts) -> Result<()> {
    let mut db = open_database(global)?;

    let known = if args.file {
        db.instance_for_file(&args.instance).is_some() || std::path::Path::new(&args.instance).is_file()
    } else {
        db.image_exists_by_sop(&args.instance)
    };
    if !known {
        return Err(miette::miette!("Instance not indexed: {}", args.instance));
    }

    let values: Vec<(Tag, String)> = if args.tags.is_empty() {
        let header = if args.file {
            db.file_header(&args.instance)
        } else {
            db.instance_header(&args.instance)
        };
        header.into_iter().collect()
    } else {
        args.tags
            .iter()
            .map(|tag| {
                let value = if args.file {
                    db.file_value(&args.instance, *tag)
                } else {
                    db.instance_value(&args.instance, *tag)
                };
                (*tag, value)
            })
            .collect()
    };

    match global.format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = values
                .into_iter()
                .map(|(tag, value)| (tag.to_string(), serde_json::Value::String(value)))
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&map).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Id if values.len() == 1 => println!("{}", values[0].1),
        _ => {
            for (tag, value) in values {
                println!("({}) {}", style(tag).cyan(), value);
            }
        }
    }

    Ok(())
}
