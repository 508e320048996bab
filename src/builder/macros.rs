//! Macros for ergonomic definition construction.

/// Build a [`StateModelDefinition`](crate::core::StateModelDefinition) from
/// bare state identifiers.
///
/// Expands to a [`DefinitionBuilder`](crate::builder::DefinitionBuilder)
/// chain and evaluates to its `Result`.
///
/// # Example
///
/// ```
/// use participant_engine::state_model;
///
/// let def = state_model! {
///     name: "Cache",
///     states: [OFFLINE, WARM, HOT, DROPPED],
///     initial: OFFLINE,
///     dropped: DROPPED,
///     transitions: [OFFLINE => WARM, WARM => HOT, HOT => WARM, WARM => OFFLINE],
/// }
/// .unwrap();
///
/// assert_eq!(def.name(), "Cache");
/// assert!(def.allows("WARM", "HOT"));
/// ```
#[macro_export]
macro_rules! state_model {
    (
        name: $name:expr,
        states: [$($state:ident),* $(,)?],
        initial: $initial:ident,
        dropped: $dropped:ident,
        transitions: [$($from:ident => $to:ident),* $(,)?] $(,)?
    ) => {
        $crate::builder::DefinitionBuilder::new($name)
            $(.state(stringify!($state)))*
            .initial(stringify!($initial))
            .dropped(stringify!($dropped))
            $(.transition(stringify!($from), stringify!($to)))*
            .build()
    };
}

#[cfg(test)]
mod tests {
    use crate::builder::{BuildError, DefinitionViolation};
    use crate::core::StateModelDefinition;

    #[test]
    fn state_model_macro_matches_builtin() {
        let def = state_model! {
            name: "MasterSlave",
            states: [OFFLINE, SLAVE, MASTER, DROPPED],
            initial: OFFLINE,
            dropped: DROPPED,
            transitions: [
                OFFLINE => SLAVE,
                SLAVE => MASTER,
                MASTER => SLAVE,
                SLAVE => OFFLINE,
            ],
        }
        .unwrap();

        assert_eq!(def, StateModelDefinition::master_slave());
    }

    #[test]
    fn state_model_macro_reports_violations() {
        let result = state_model! {
            name: "Broken",
            states: [OFFLINE, ONLINE],
            initial: OFFLINE,
            dropped: DROPPED,
            transitions: [OFFLINE => STANDBY],
        };

        let Err(BuildError::InvalidDefinition(violations)) = result else {
            panic!("expected invalid definition");
        };
        assert!(violations.contains(&DefinitionViolation::UnknownDroppedState(
            "DROPPED".to_string()
        )));
        assert!(violations.contains(&DefinitionViolation::UnknownTransitionState {
            from: "OFFLINE".to_string(),
            to: "STANDBY".to_string(),
        }));
    }

    #[test]
    fn state_model_macro_allows_empty_table() {
        let def = state_model! {
            name: "Pinned",
            states: [OFFLINE, DROPPED],
            initial: OFFLINE,
            dropped: DROPPED,
            transitions: [],
        }
        .unwrap();

        assert!(!def.allows("OFFLINE", "OFFLINE"));
        assert!(def.allows("OFFLINE", "DROPPED"));
    }
}
