mod smoke_tests;

// This file organizes the integration tests into a cohesive test suite.
// Each module tests a specific aspect of the application:
// - smoke_tests: Basic wiring checks to ensure nothing is broken
// - google_calendar_mock: The Google Calendar source against a mocked API
// - refresh_scheduler: The refresh loop and reminders under paused time
