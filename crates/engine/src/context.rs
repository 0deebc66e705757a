//! Expansion of a job configuration into capture tasks

use shotline_common::{Error, JobConfig, Phase, ScreenshotContext};

/// One context per (url, path, width), in the order urls -> paths -> widths.
///
/// Every combination is emitted; the result only depends on `config` and
/// `phase`. A URL without paths or widths is a configuration error.
pub fn build_contexts(config: &JobConfig, phase: Phase) -> Result<Vec<ScreenshotContext>, Error> {
    let mut contexts = Vec::new();

    for (url, url_config) in &config.urls {
        if url_config.paths.is_empty() {
            return Err(Error::config(format!("No paths configured for {}", url)));
        }
        if url_config.window_widths.is_empty() {
            return Err(Error::config(format!("No window widths configured for {}", url)));
        }

        for path in &url_config.paths {
            for &width in &url_config.window_widths {
                contexts.push(ScreenshotContext::new(url, path, width, phase, url_config));
            }
        }
    }

    Ok(contexts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shotline_common::UrlConfig;
    use test_case::test_case;

    fn config(urls: usize, paths: usize, widths: usize) -> JobConfig {
        let mut config = JobConfig::default_for("http://placeholder");
        config.urls.clear();
        for u in 0..urls {
            config.urls.insert(
                format!("https://site{}.example", u),
                UrlConfig {
                    paths: (0..paths).map(|p| format!("page{}", p)).collect(),
                    window_widths: (0..widths).map(|w| 400 + 200 * w as u32).collect(),
                    ..UrlConfig::default()
                },
            );
        }
        config
    }

    #[test_case(1, 1, 1)]
    #[test_case(2, 3, 4)]
    #[test_case(3, 1, 5)]
    fn test_emits_cartesian_product(urls: usize, paths: usize, widths: usize) {
        let config = config(urls, paths, widths);
        for phase in [Phase::Before, Phase::After] {
            let contexts = build_contexts(&config, phase).unwrap();
            assert_eq!(contexts.len(), urls * paths * widths);
            assert!(contexts.iter().all(|c| c.phase == phase));
        }
    }

    #[test]
    fn test_order_is_urls_then_paths_then_widths() {
        let contexts = build_contexts(&config(2, 2, 2), Phase::Before).unwrap();
        let keys: Vec<(String, String, u32)> = contexts
            .iter()
            .map(|c| (c.url.clone(), c.path.clone(), c.window_width))
            .collect();

        assert_eq!(keys[0], ("https://site0.example".to_string(), "page0".to_string(), 400));
        assert_eq!(keys[1], ("https://site0.example".to_string(), "page0".to_string(), 600));
        assert_eq!(keys[2], ("https://site0.example".to_string(), "page1".to_string(), 400));
        assert_eq!(keys[4], ("https://site1.example".to_string(), "page0".to_string(), 400));
    }

    #[test]
    fn test_deterministic_and_phases_mirror_each_other() {
        let config = config(3, 2, 2);
        let first = build_contexts(&config, Phase::Before).unwrap();
        let second = build_contexts(&config, Phase::Before).unwrap();
        let after = build_contexts(&config, Phase::After).unwrap();

        assert_eq!(first, second);
        for (b, a) in first.iter().zip(after.iter()) {
            assert_eq!(b.with_phase(Phase::After), *a);
        }
    }

    #[test]
    fn test_empty_widths_is_configuration_error() {
        let mut config = config(1, 1, 1);
        config.urls.values_mut().for_each(|u| u.window_widths.clear());
        assert!(matches!(build_contexts(&config, Phase::Before), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_empty_paths_is_configuration_error() {
        let mut config = config(1, 1, 1);
        config.urls.values_mut().for_each(|u| u.paths.clear());
        assert!(matches!(build_contexts(&config, Phase::After), Err(Error::Configuration(_))));
    }
}
