// Copyright 2025
// Licensed under the Elastic License v2.0

//! Source connectors for CDC data ingestion
//!
//! Each source implements the `Source` trait from `crate::core::traits`.

pub mod kafka;

use anyhow::Result;

use crate::config::{SourceConfig, SourceFormat};
use crate::core::Source;

use self::kafka::{
    AvroEnvelopeDecoder, EnvelopeDecoder, JsonEnvelopeDecoder, KafkaSource, SchemaRegistryClient,
};

/// Factory function to create a source based on configuration
///
/// # Example
/// ```ignore
/// let mut source = create_source(&config.source)?;
/// let event = source.poll(Duration::from_secs(1)).await?;
/// ```
pub fn create_source(config: &SourceConfig) -> Result<Box<dyn Source>> {
    let decoder = create_decoder(config)?;
    let source = KafkaSource::new(config, decoder)?;
    Ok(Box::new(source))
}

/// Picks the message decoder for the configured wire format
fn create_decoder(config: &SourceConfig) -> Result<Box<dyn EnvelopeDecoder>> {
    match config.format {
        SourceFormat::Json => Ok(Box::new(JsonEnvelopeDecoder)),
        SourceFormat::Avro => {
            let registry = SchemaRegistryClient::new(&config.schema_registry_url)?;
            Ok(Box::new(AvroEnvelopeDecoder::new(registry)))
        }
    }
}
