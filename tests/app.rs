mod support;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;

use flux_stations::app::{App, DownloadOptions, ProgressEvent, ProgressSink, RegistryOptions};
use flux_stations::catalog::SiteRequest;
use flux_stations::config::{Config, ConfigLoader, ResolvedConfig};
use flux_stations::domain::Network;
use flux_stations::error::{ErrorCategory, FluxError};
use flux_stations::networks::{NetworkAdapter, SparqlClient, build_adapters};
use flux_stations::networks::icos::{SparqlResults, SparqlTerm};

use support::{ALICE_LINK, MockConverter, MockTransport, row};

const ALICE_URL: &str = "https://dap.tern.org.au/thredds/fileServer/ecosystem_process/\
ozflux/AliceSpringsMulga/2022_v2/L6/default/AliceSpringsMulga_L6_Daily.nc";

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

struct FixtureSparql;

impl SparqlClient for FixtureSparql {
    fn select(&self, _endpoint: &str, _query: &str) -> Result<SparqlResults, FluxError> {
        let binding: BTreeMap<String, SparqlTerm> = [
            ("Short_name", "DE-Tha"),
            ("Country", "DE"),
            ("PI_names", "Bernhofer;Gruenwald"),
            ("Site_type", "Evergreen Needleleaf Forests"),
            ("latstr", "50.9626"),
            ("lonstr", "13.5651"),
        ]
        .into_iter()
        .map(|(key, value)| {
            (
                key.to_string(),
                SparqlTerm {
                    value: value.to_string(),
                },
            )
        })
        .collect();
        Ok(SparqlResults {
            bindings: vec![binding],
        })
    }
}

fn config_in(dir: &Path) -> ResolvedConfig {
    ConfigLoader::resolve_config(Config::default(), dir).unwrap()
}

fn request(name: &str, fluxnet: &str) -> SiteRequest {
    SiteRequest {
        name: name.to_string(),
        fluxnet_id: Some(fluxnet.to_string()),
    }
}

#[test]
fn download_batch_counts_each_outcome() {
    let temp = tempfile::tempdir().unwrap();
    let dest = temp.path().join("ozflux");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("AU-How_daily.nc"), b"nc").unwrap();
    fs::write(dest.join("AU-How_daily.csv"), b"csv").unwrap();

    let catalog = vec![
        row("AliceSpringsMulga_2021_v1", ALICE_LINK),
        row("AliceSpringsMulga_2022_v2", ALICE_LINK),
        row("HowardSprings_2022_v1", ALICE_LINK),
        row("Tumbarumba", ALICE_LINK),
    ];
    let sites = vec![
        request("Alice Springs Mulga", "AU-ASM"),
        request("Howard Springs", "AU-How"),
        request("Tumbarumba", "AU-Tum"),
    ];

    let transport = MockTransport::default()
        .with_status(ALICE_URL, 200)
        .with_body(b"netcdf bytes");
    let probes = transport.clone();
    let mut config = config_in(temp.path());
    config.download.score_cutoff = 50;
    let app = App::new(config, transport, MockConverter::default());
    let sink = RecordingSink::default();
    let options = DownloadOptions {
        dest_dir: dest.clone(),
        overwrite: false,
    };
    let report = app.download_sites(&catalog, &sites, &options, &sink);

    assert_eq!(report.items.len(), 3);
    assert_eq!(report.resolved, 1);
    assert_eq!(report.already_present, 1);
    assert_eq!(report.failed, 1);

    assert_eq!(report.items[0].action, "downloaded");
    assert_eq!(report.items[0].url.as_deref(), Some(ALICE_URL));
    assert_eq!(fs::read(dest.join("AU-ASM_daily.nc")).unwrap(), b"netcdf bytes");
    assert!(dest.join("AU-ASM_daily.csv").exists());

    assert_eq!(report.items[1].action, "already-present");
    assert_eq!(report.items[2].action, "failed");
    assert_eq!(report.items[2].category, Some(ErrorCategory::ResolutionFailure));

    // the present site never reached the network, the unmatched one never resolved
    assert_eq!(probes.probes(), vec![ALICE_URL.to_string()]);
    assert_eq!(sink.messages.lock().unwrap().len(), 3);
}

#[test]
fn unreachable_artifact_is_never_fetched() {
    let temp = tempfile::tempdir().unwrap();
    let catalog = vec![row("AliceSpringsMulga_2022_v2", ALICE_LINK)];
    let sites = vec![request("Alice Springs", "AU-ASM")];

    let transport = MockTransport::default().with_body(b"unused");
    let calls = transport.clone();
    let converter = MockConverter::default();
    let conversions = converter.log.clone();
    let app = App::new(config_in(temp.path()), transport, converter);
    let options = DownloadOptions {
        dest_dir: temp.path().join("out"),
        overwrite: false,
    };
    let report = app.download_sites(&catalog, &sites, &options, &RecordingSink::default());

    assert_eq!(report.failed, 1);
    assert_eq!(report.items[0].category, Some(ErrorCategory::ResolutionFailure));
    assert_eq!(calls.probes().len(), 2);
    assert!(calls.opens().is_empty());
    assert_eq!(conversions.lock().unwrap().conversions, 0);
    assert!(!temp.path().join("out/AU-ASM_daily.nc").exists());
}

#[test]
fn present_pair_skips_all_requests() {
    let temp = tempfile::tempdir().unwrap();
    let dest = temp.path().to_path_buf();
    fs::write(dest.join("AU-ASM_daily.nc"), b"nc").unwrap();
    fs::write(dest.join("AU-ASM_daily.csv"), b"csv").unwrap();

    let transport = MockTransport::default();
    let calls = transport.clone();
    let app = App::new(config_in(temp.path()), transport, MockConverter::default());
    let options = DownloadOptions {
        dest_dir: dest,
        overwrite: false,
    };
    let report = app.download_sites(
        &[row("AliceSpringsMulga_2022_v2", ALICE_LINK)],
        &[request("Alice Springs Mulga", "AU-ASM")],
        &options,
        &RecordingSink::default(),
    );
    assert_eq!(report.already_present, 1);
    assert!(calls.probes().is_empty());
    assert!(calls.opens().is_empty());
}

#[test]
fn missing_catalog_table_aborts_download() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        config_in(temp.path()),
        MockTransport::default(),
        MockConverter::default(),
    );
    let options = DownloadOptions {
        dest_dir: temp.path().join("out"),
        overwrite: false,
    };
    let err = app
        .download(&options, &RecordingSink::default())
        .unwrap_err();
    assert_matches!(err, FluxError::CatalogRead { .. });
    assert!(err.is_fatal());
}

#[test]
fn registry_run_writes_both_exports() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(
        temp.path().join("AmeriFlux-sites.csv"),
        "Site Id,Name,Vegetation,Climate,Elevation,Years,Url,PI,Email,Country,State,Start,End,\
Latitude,Longitude\n\
US-ARL,ARM Lamont,Cropland,,,,,Margaret Torn,,USA,OK,,,35.5465,-98.0401\n\
AU-Foo,Foo Creek,Grassland,,,,,Jane Doe,,AUS,,,,,\n",
    )
    .unwrap();
    fs::write(temp.path().join("ameriflux_meta.json"), "{}").unwrap();
    fs::write(
        temp.path().join("icos_meta.json"),
        r#"{"DE-Tha": {"start_date": "1996-01-01", "end_date": null}}"#,
    )
    .unwrap();

    let mut config = config_in(temp.path());
    config.networks = vec![Network::Ameriflux, Network::Icos];
    let adapters: Vec<Box<dyn NetworkAdapter>> =
        build_adapters(&config, std::sync::Arc::new(FixtureSparql));
    let app = App::new(config, MockTransport::default(), MockConverter::default());
    let options = RegistryOptions::from_shapefile(temp.path().join("out/flux_stations.shp"));
    let report = app
        .build_registry(&adapters, &options, &RecordingSink::default())
        .unwrap();

    assert_eq!(report.sites, 3);
    assert_eq!(report.spatial_sites, 2);
    assert_eq!(report.per_network.get("ameriflux"), Some(&1));
    assert_eq!(report.per_network.get("ozflux"), Some(&1));
    assert_eq!(report.per_network.get("icos"), Some(&1));
    assert!(temp.path().join("out/flux_stations.csv").exists());
    assert!(temp.path().join("out/flux_stations.shp").exists());

    let table = fs::read_to_string(temp.path().join("out/flux_stations.csv")).unwrap();
    assert!(table.contains("icos,DE,DE-Tha,Bernhofer;Gruenwald,Evergreen Needleleaf Forests,"));
}

#[test]
fn missing_network_source_aborts_registry() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = config_in(temp.path());
    config.networks = vec![Network::Ozflux];
    let adapters = build_adapters(&config, std::sync::Arc::new(FixtureSparql));
    let app = App::new(config, MockTransport::default(), MockConverter::default());
    let options = RegistryOptions::from_shapefile(temp.path().join("flux_stations.shp"));
    let err = app
        .build_registry(&adapters, &options, &RecordingSink::default())
        .unwrap_err();
    assert_matches!(
        err,
        FluxError::SourceUnavailable {
            network: Network::Ozflux,
            ..
        }
    );
    assert!(!temp.path().join("flux_stations.csv").exists());
}
