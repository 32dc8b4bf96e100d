use std::{process, sync::Arc};

use cardiosim::{
    cli::{self, Cli},
    config::Config,
    core::{
        alerts::AlertListener,
        clock::SystemClock,
        controller::{Controller, StopReason},
        executor::Executor,
        reading::RandomHeartRate,
    },
    logger::LoggerManager,
    print_error,
    sink::{HttpSink, MqttSink, Sink},
};
use cardiosim_mqtt::{ConnectionState, EndpointMetadata, MqttManager, StatusCallback};
use tracing::{debug, error, info, warn};

fn parse_cli() -> Cli {
    Cli::try_from_args(std::env::args_os()).unwrap_or_else(|e| {
        // Usage errors go to stderr, help and version to stdout.
        let _ = e.print();
        process::exit(cli::exit_code(&e));
    })
}

fn status_callback() -> StatusCallback {
    Arc::new(|state: &ConnectionState| match state {
        ConnectionState::Connected => {
            info!("Connected to MQTT broker with result code {}", state.return_code().unwrap_or(0))
        }
        ConnectionState::Refused(code) => {
            error!("MQTT broker refused the connection with result code {}", code)
        }
        ConnectionState::Disconnected(reason) => warn!("MQTT connection lost: {}", reason),
        other => debug!("MQTT connection state: {}", other),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = parse_cli();

    let cfg = Config::new(cli.config.as_deref(), &cli.overrides()).unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });

    let logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });

    info!("Starting cardiosim version {}...", env!("CARGO_PKG_VERSION"));
    info!("Device: {}", cli.device);
    debug!("{:#?}", cfg);

    let http_sink = if cfg.http.enabled {
        let sink = HttpSink::from_config(&cfg.http).unwrap_or_else(|e| {
            error!("Failed to create HTTP client: {}", e);
            process::exit(1);
        });
        info!("HTTP sink enabled: POST {}", sink.url());
        Some(sink)
    } else {
        info!("HTTP sink disabled");
        None
    };

    let instance = MqttManager::from_config(cfg.transport.clone())
        .unwrap_or_else(|e| {
            error!("Failed to create MqttManager: {}", e);
            process::exit(1);
        })
        .with_status_callback(status_callback())
        .build_and_start()
        .await
        .unwrap_or_else(|e| {
            error!("Failed to start MQTT transport: {}", e);
            process::exit(1);
        });

    if let Some(alert_topic) = cfg.device.alert_topic_for(&cli.device) {
        AlertListener::new(
            instance.with_base_topic(&alert_topic),
            instance.incoming(),
            instance.cancel_token(),
        )
        .spawn();
        if let Err(e) = instance.subscribe(&alert_topic).await {
            warn!("Failed to subscribe to alert topic '{}': {}", alert_topic, e);
        }
    }

    let endpoint = EndpointMetadata {
        topic: cfg.device.topic_for(&cli.device),
        qos: cfg.device.qos,
        retain: cfg.device.retain,
    };
    let mqtt_sink = MqttSink::new(instance, endpoint);
    info!("MQTT sink publishing to {}", mqtt_sink.topic());

    let mut sinks: Vec<Arc<dyn Sink>> = vec![Arc::new(mqtt_sink)];
    if let Some(sink) = http_sink {
        sinks.push(Arc::new(sink));
    }

    let controller = Controller::new(sinks);
    let executor = Executor::new(
        cli.device.clone(),
        Box::new(RandomHeartRate::from_entropy()),
        Arc::new(SystemClock),
        controller.sinks(),
    )
    .with_style(cfg.device.payload_style)
    .with_interval(cfg.device.interval())
    .with_alert_limit(cfg.device.alert_limit);

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown..."),
            Err(e) => {
                error!("Failed to listen for Ctrl+C, running until killed: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    match controller.run(executor, shutdown).await {
        StopReason::Requested => Ok(()),
        reason => {
            error!("Stopped abnormally: {:?}", reason);
            process::exit(1);
        }
    }
}
