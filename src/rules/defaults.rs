use crate::config::CoordinationConfig;
use crate::rules::engine::SourceRulesEngine;
use crate::rules::{ProcessingRule, RuleType};
use crate::types::observation::Observation;
use crate::types::source::DataSource;
use crate::utils::helper::current_unix_secs;

const OHLCV_MIN_PERCENT_CHANGE: f64 = 1.0;
const OHLCV_MIN_VOLUME_RATIO: f64 = 1.5;
const FMV_MIN_CONFIDENCE: f64 = 0.7;
const FMV_MAX_DEVIATION_PERCENT: f64 = 5.0;

/// Canonical rule set. Threshold rules pass through when the optional
/// fields they inspect are absent.
pub fn install_default_rules(engine: &SourceRulesEngine, config: &CoordinationConfig) {
    let max_age = config.freshness_max_age_secs;
    engine.add_global_rule(ProcessingRule::new(
        "freshness_check",
        RuleType::Filter,
        0,
        Box::new(move |observation, _| {
            Ok(current_unix_secs() - observation.timestamp() <= max_age)
        }),
    ));

    engine.add_rule(
        ProcessingRule::new(
            "ohlcv_min_change",
            RuleType::Filter,
            10,
            Box::new(|observation, _| match observation {
                Observation::Ohlcv(bar) => Ok(bar
                    .percent_change
                    .map(|pc| pc.abs() >= OHLCV_MIN_PERCENT_CHANGE)
                    .unwrap_or(true)),
                _ => Ok(true),
            }),
        )
        .for_sources(vec![DataSource::Ohlcv]),
    );

    engine.add_rule(
        ProcessingRule::new(
            "ohlcv_volume_surge",
            RuleType::Filter,
            11,
            Box::new(|observation, _| match observation {
                Observation::Ohlcv(bar) => Ok(match bar.avg_volume {
                    Some(avg) if avg > 0 => {
                        bar.volume as f64 / avg as f64 >= OHLCV_MIN_VOLUME_RATIO
                    }
                    _ => true,
                }),
                _ => Ok(true),
            }),
        )
        .for_sources(vec![DataSource::Ohlcv]),
    );

    engine.add_rule(
        ProcessingRule::new(
            "fmv_confidence_floor",
            RuleType::Filter,
            10,
            Box::new(|observation, _| match observation {
                Observation::Fmv(fmv) => Ok(fmv.confidence >= FMV_MIN_CONFIDENCE),
                _ => Ok(true),
            }),
        )
        .for_sources(vec![DataSource::Fmv]),
    );

    engine.add_rule(
        ProcessingRule::new(
            "fmv_deviation_cap",
            RuleType::Filter,
            11,
            Box::new(|observation, _| match observation {
                Observation::Fmv(fmv) => {
                    Ok(fmv.deviation_percent.abs() <= FMV_MAX_DEVIATION_PERCENT)
                }
                _ => Ok(true),
            }),
        )
        .for_sources(vec![DataSource::Fmv]),
    );

    engine.add_rule(
        ProcessingRule::new(
            "tick_required_fields",
            RuleType::Validate,
            10,
            Box::new(|observation, _| match observation {
                Observation::Tick(tick) => {
                    Ok(!tick.ticker.is_empty() && tick.price > 0.0 && tick.timestamp > 0.0)
                }
                _ => Ok(true),
            }),
        )
        .for_sources(vec![DataSource::Tick, DataSource::WebSocket]),
    );
}
