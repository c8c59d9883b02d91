/*!
# Vigil DevKit - Mocks et utilitaires de test du pipeline

- Mock de l'API de gestion des hyperviseurs (pannes injectables, compteurs)
- Fixtures d'hôtes, d'invités et de tâches
- Harness câblant un pipeline complet sur des endpoints simulés
*/

pub mod fixtures;
pub mod mock_api;
pub mod test_utils;

pub use mock_api::{MockConnector, MockManagementApi};
pub use test_utils::TestHarness;
