//! Launch building.
//!
//! Turns a matched (task, offer) pair into the concrete launch
//! descriptor sent with the accept call. Pure: placement fields are
//! written into the returned task, nothing touches the store.

use hermit_core::Task;
use hermit_driver::{
    CommandInfo, CommandUri, ContainerInfo, EnvVar, NetworkMode, Offer, Parameter, PortMapping,
    Resource, TaskInfo, ValueRange, VolumeInfo, VolumeMode,
};

/// Fill placement from the offer and build the launch descriptor.
pub fn build_launch(mut task: Task, offer: &Offer) -> (Task, TaskInfo) {
    task.framework_id = offer.framework_id.clone();
    task.agent_id = offer.agent_id.clone();
    task.hostname = offer.hostname.clone();
    task.agent_ip = offer.agent_ip.clone();
    task.agent_port = offer.agent_port;

    let (mappings, port_ranges) = allocate_ports(&mut task, offer);

    let mut environment: Vec<EnvVar> = task
        .env
        .iter()
        .chain(task.masked_env.iter())
        .map(|(name, value)| EnvVar { name: name.clone(), value: value.clone() })
        .collect();
    for (i, mapping) in mappings.iter().enumerate() {
        environment.push(EnvVar {
            name: format!("PORT{i}"),
            value: mapping.host_port.to_string(),
        });
        if i == 0 {
            environment.push(EnvVar {
                name: "PORT".to_string(),
                value: mapping.host_port.to_string(),
            });
        }
    }
    environment.push(EnvVar {
        name: "MESOS_TASK_ID".to_string(),
        value: task.id.clone(),
    });

    let volumes = task
        .volumes
        .iter()
        .map(|v| VolumeInfo {
            container_path: v.container_path.clone(),
            host_path: v.host_path.clone(),
            mode: VolumeMode::Rw,
        })
        .collect();

    let uris = task
        .fetch_uris
        .iter()
        .map(|f| CommandUri {
            value: f.uri.clone(),
            extract: f.extract,
            executable: f.executable,
            cache: f.cache,
        })
        .collect();

    let mut parameters = Vec::new();
    if let Some(dns) = &task.dns {
        parameters.push(Parameter { key: "dns".to_string(), value: dns.clone() });
    }

    let command = if task.command.is_empty() {
        CommandInfo {
            shell: false,
            value: None,
            arguments: task.args.clone(),
            user: task.user.clone(),
            environment,
            uris,
        }
    } else {
        CommandInfo {
            shell: true,
            value: Some(task.command.clone()),
            arguments: Vec::new(),
            user: task.user.clone(),
            environment,
            uris,
        }
    };

    let mut resources = vec![
        Resource::scalar("cpus", task.cpus),
        Resource::scalar("mem", task.mem),
    ];
    if !port_ranges.is_empty() {
        resources.push(Resource::ranges("ports", port_ranges));
    }

    let info = TaskInfo {
        task_id: task.id.clone(),
        name: task.name.clone(),
        agent_id: offer.agent_id.clone(),
        command,
        container: ContainerInfo {
            image: task.image.clone(),
            network: NetworkMode::from_name(&task.network),
            port_mappings: mappings,
            force_pull_image: task.force_pull_image,
            privileged: task.privileged,
            volumes,
            parameters,
        },
        resources,
    };

    (task, info)
}

/// Assign host ports from the offer's port ranges, consuming requested
/// entries from the end of `task.ports`. Entries with a zero container
/// port are skipped. Returns the mappings plus the contiguous sub-ranges
/// actually consumed from the offer, for the launch resources.
fn allocate_ports(task: &mut Task, offer: &Offer) -> (Vec<PortMapping>, Vec<ValueRange>) {
    // Ascending index order; pop() hands out the last entry first.
    let mut pending: Vec<usize> = task
        .ports
        .iter()
        .enumerate()
        .filter(|(_, p)| p.container_port != 0)
        .map(|(i, _)| i)
        .collect();
    if pending.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let mut mappings = Vec::new();
    let mut consumed = Vec::new();
    let offered = offer
        .resources
        .iter()
        .filter(|r| r.name == "ports")
        .filter_map(|r| r.as_ranges())
        .flatten();

    for range in offered {
        if pending.is_empty() {
            break;
        }
        let mut taken: Option<ValueRange> = None;
        for host in range.begin..=range.end {
            let Some(idx) = pending.pop() else { break };
            let entry = &mut task.ports[idx];
            entry.host_port = host as u32;
            mappings.push(PortMapping {
                container_port: entry.container_port,
                host_port: host as u32,
                protocol: entry.protocol.clone(),
            });
            taken = Some(match taken {
                None => ValueRange { begin: host, end: host },
                Some(r) => ValueRange { begin: r.begin, end: host },
            });
        }
        if let Some(range) = taken {
            consumed.push(range);
        }
    }

    (mappings, consumed)
}
